//! Actions and the write-action set
//!
//! An action list executes in order (APPLY_ACTIONS); the action set holds
//! at most one action per type and executes in the fixed priority order of
//! OpenFlow 1.3 §5.10.

use ofsw_common::openflow::ActionKind;
use serde::{Deserialize, Serialize};

use crate::oxm::Match;

// Internal action flags set by the install-time examination pass.
/// This OUTPUT must transmit a copy because later work mutates the packet.
pub const OUTPUT_COPIED_PACKET: u32 = 1 << 0;
/// A set-field of ETH_SRC follows the push this flag sits on.
pub const SET_FIELD_ETH_SRC: u32 = 1 << 1;
/// A set-field of ETH_DST follows the push this flag sits on.
pub const SET_FIELD_ETH_DST: u32 = 1 << 2;

/// Per-type action payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionBody {
    /// Transmit on a port (or a reserved port).
    Output {
        /// Destination port number.
        port: u32,
        /// Bytes to include in a resulting packet-in.
        max_len: u16,
    },
    /// Copy TTL from outermost to next-outermost header.
    CopyTtlOut,
    /// Copy TTL from next-outermost to outermost header.
    CopyTtlIn,
    /// Set the MPLS TTL.
    SetMplsTtl(u8),
    /// Decrement the MPLS TTL.
    DecMplsTtl,
    /// Push a VLAN tag with the given TPID.
    PushVlan(u16),
    /// Pop the outermost VLAN tag.
    PopVlan,
    /// Push an MPLS label stack entry with the given ethertype.
    PushMpls(u16),
    /// Pop the outermost MPLS entry, restoring the given ethertype.
    PopMpls(u16),
    /// Tag the packet with an egress queue.
    SetQueue(u32),
    /// Process through a group.
    Group(u32),
    /// Set the IP TTL.
    SetNwTtl(u8),
    /// Decrement the IP TTL.
    DecNwTtl,
    /// Rewrite a header field.
    SetField(Match),
    /// Push a PBB header with the given ethertype.
    PushPbb(u16),
    /// Pop the outermost PBB header.
    PopPbb,
    /// Encapsulate with the named header type (OpenFlow 1.4).
    Encap(u32),
    /// Decapsulate the named header type (OpenFlow 1.4).
    Decap {
        /// Current packet type being stripped.
        cur_pkt_type: u32,
        /// Resulting packet type, or USE_NEXT_PROTO.
        new_pkt_type: u32,
    },
    /// Experimenter hook.
    Experimenter(u32),
}

impl ActionBody {
    /// The OFPAT_* kind of this action.
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionBody::Output { .. } => ActionKind::Output,
            ActionBody::CopyTtlOut => ActionKind::CopyTtlOut,
            ActionBody::CopyTtlIn => ActionKind::CopyTtlIn,
            ActionBody::SetMplsTtl(_) => ActionKind::SetMplsTtl,
            ActionBody::DecMplsTtl => ActionKind::DecMplsTtl,
            ActionBody::PushVlan(_) => ActionKind::PushVlan,
            ActionBody::PopVlan => ActionKind::PopVlan,
            ActionBody::PushMpls(_) => ActionKind::PushMpls,
            ActionBody::PopMpls(_) => ActionKind::PopMpls,
            ActionBody::SetQueue(_) => ActionKind::SetQueue,
            ActionBody::Group(_) => ActionKind::Group,
            ActionBody::SetNwTtl(_) => ActionKind::SetNwTtl,
            ActionBody::DecNwTtl => ActionKind::DecNwTtl,
            ActionBody::SetField(_) => ActionKind::SetField,
            ActionBody::PushPbb(_) => ActionKind::PushPbb,
            ActionBody::PopPbb => ActionKind::PopPbb,
            ActionBody::Encap(_) => ActionKind::Encap,
            ActionBody::Decap { .. } => ActionKind::Decap,
            ActionBody::Experimenter(_) => ActionKind::Experimenter,
        }
    }
}

/// An action plus the install-time annotations the dataplane needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// The action itself.
    pub body: ActionBody,
    /// Examination-pass flags.
    pub flags: u32,
    /// Cookie of the owning flow, for packet-in attribution.
    pub cookie: u64,
}

impl Action {
    /// Wrap a body with no annotations.
    pub fn new(body: ActionBody) -> Self {
        Action {
            body,
            flags: 0,
            cookie: 0,
        }
    }

    /// OUTPUT with OFPCML_NO_BUFFER semantics.
    pub fn output(port: u32) -> Self {
        Action::new(ActionBody::Output {
            port,
            max_len: ofsw_common::openflow::OFPCML_NO_BUFFER,
        })
    }
}

/// An ordered action list.
pub type ActionList = Vec<Action>;

/// Number of write-set priority slots.
pub const ACTION_SET_ORDER_MAX: usize = 11;

/// Write-set execution slot for an action kind: §5.10 order
/// copy-ttl-in, pop, push-MPLS, push-PBB, push-VLAN, copy-ttl-out,
/// ttl adjust, set-field, qos, group, output.
pub fn action_set_order(kind: ActionKind) -> Option<usize> {
    use ActionKind::*;
    Some(match kind {
        CopyTtlIn => 0,
        PopVlan | PopMpls | PopPbb | Decap => 1,
        PushMpls => 2,
        PushPbb => 3,
        PushVlan | Encap => 4,
        CopyTtlOut => 5,
        DecMplsTtl | SetMplsTtl | DecNwTtl | SetNwTtl => 6,
        SetField => 7,
        SetQueue => 8,
        Group => 9,
        Output => 10,
        Experimenter => return None,
    })
}

/// The accumulated write-action set: one list per priority slot with
/// at-most-one-per-type semantics (per-field for set-field).
#[derive(Debug, Clone, Default)]
pub struct ActionSet {
    slots: [ActionList; ACTION_SET_ORDER_MAX],
    has_actions: bool,
}

impl ActionSet {
    /// Empty set.
    pub fn new() -> Self {
        ActionSet::default()
    }

    /// `true` when any action has been written.
    pub fn has_actions(&self) -> bool {
        self.has_actions
    }

    /// Slots in execution order.
    pub fn slots(&self) -> &[ActionList; ACTION_SET_ORDER_MAX] {
        &self.slots
    }

    /// Merge a written action list: a same-type action overwrites the
    /// earlier one, set-field overwrites only the same field.
    pub fn merge(&mut self, actions: &[Action]) {
        for action in actions {
            let slot = match action_set_order(action.body.kind()) {
                Some(slot) => slot,
                None => continue,
            };
            let list = &mut self.slots[slot];
            list.retain(|existing| {
                if existing.body.kind() != action.body.kind() {
                    return true;
                }
                match (&existing.body, &action.body) {
                    (ActionBody::SetField(a), ActionBody::SetField(b)) => a.field != b.field,
                    _ => false,
                }
            });
            list.push(action.clone());
            self.has_actions = true;
        }
    }

    /// Drop everything (CLEAR_ACTIONS).
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.has_actions = false;
    }

    /// Total action count across slots.
    pub fn len(&self) -> usize {
        self.slots.iter().map(|s| s.len()).sum()
    }

    /// `true` when no actions are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ofsw_common::openflow::OxmField;

    #[test]
    fn test_merge_overwrites_same_type() {
        let mut set = ActionSet::new();
        set.merge(&[Action::output(2)]);
        set.merge(&[Action::output(3)]);
        let outputs = &set.slots()[10];
        assert_eq!(outputs.len(), 1);
        assert_eq!(
            outputs[0].body,
            ActionBody::Output {
                port: 3,
                max_len: ofsw_common::openflow::OFPCML_NO_BUFFER
            }
        );
    }

    #[test]
    fn test_merge_set_field_per_field() {
        let mut set = ActionSet::new();
        let dst1 = Action::new(ActionBody::SetField(Match::eth_dst([1; 6])));
        let src = Action::new(ActionBody::SetField(Match::eth_src([2; 6])));
        let dst2 = Action::new(ActionBody::SetField(Match::eth_dst([3; 6])));
        set.merge(&[dst1, src, dst2]);
        let fields = &set.slots()[7];
        assert_eq!(fields.len(), 2);
        // The second eth_dst replaced the first.
        assert!(fields.iter().any(|a| matches!(
            &a.body,
            ActionBody::SetField(m) if m.field == OxmField::EthDst && m.value == vec![3; 6]
        )));
    }

    #[test]
    fn test_execution_order_slots() {
        assert_eq!(action_set_order(ActionKind::CopyTtlIn), Some(0));
        assert!(action_set_order(ActionKind::PopMpls) < action_set_order(ActionKind::PushMpls));
        assert!(action_set_order(ActionKind::PushMpls) < action_set_order(ActionKind::PushVlan));
        assert!(action_set_order(ActionKind::SetField) < action_set_order(ActionKind::Group));
        assert_eq!(action_set_order(ActionKind::Output), Some(10));
    }

    #[test]
    fn test_clear() {
        let mut set = ActionSet::new();
        set.merge(&[Action::output(1)]);
        assert!(set.has_actions());
        set.clear();
        assert!(!set.has_actions());
        assert!(set.is_empty());
    }
}
