//! Flow entries
//!
//! A flow is owned by exactly one table. Counters are relaxed atomics so
//! dataplane readers can bump them under the shared read lock; everything
//! else mutates only under the write barrier.

use std::sync::atomic::{AtomicU64, Ordering};

use ofsw_common::openflow::{
    FlowRemovedReason, ActionKind, COUNTER_UNAVAILABLE, OFPFF_NO_BYT_COUNTS,
    OFPFF_NO_PKT_COUNTS, OxmField,
};
use ofsw_common::Timestamp;
use serde::{Deserialize, Serialize};

use crate::action::{OUTPUT_COPIED_PACKET, SET_FIELD_ETH_DST, SET_FIELD_ETH_SRC};
use crate::action::{ActionBody, ActionList};
use crate::instruction::{Instruction, InstructionSet};
use crate::msgs::FlowMod;
use crate::oxm::{match_lists_equal, Match};

/// Stable flow identifier used for group/meter back-references.
pub type FlowId = u64;

/// One flow entry.
#[derive(Debug)]
pub struct Flow {
    /// Stable id for back-references.
    pub id: FlowId,
    /// Owning table.
    pub table_id: u8,
    /// Matching precedence.
    pub priority: u16,
    /// Controller cookie.
    pub cookie: u64,
    /// OFPFF_* flags.
    pub flags: u16,
    /// Idle timeout in seconds; zero disables.
    pub idle_timeout: u16,
    /// Hard timeout in seconds; zero disables.
    pub hard_timeout: u16,
    /// Install time.
    pub create_time: Timestamp,
    /// Last hit time, nanoseconds from the clock origin.
    update_time_ns: AtomicU64,
    packet_count: AtomicU64,
    byte_count: AtomicU64,
    /// The match list, validated at install.
    pub match_list: Vec<Match>,
    /// Set of OXM fields present in `match_list`.
    pub field_bits: u64,
    /// Per-kind instructions.
    pub instructions: InstructionSet,
}

fn ts_nanos(ts: Timestamp) -> u64 {
    ts.sec * 1_000_000_000 + ts.nsec as u64
}

impl Flow {
    /// Build a flow from a validated flow-mod. The caller has already run
    /// prerequisite, mask and instruction checks.
    pub fn new(
        id: FlowId,
        flow_mod: &FlowMod,
        match_list: Vec<Match>,
        field_bits: u64,
        instructions: InstructionSet,
        now: Timestamp,
    ) -> Self {
        Flow {
            id,
            table_id: flow_mod.table_id,
            priority: flow_mod.priority,
            cookie: flow_mod.cookie,
            flags: flow_mod.flags,
            idle_timeout: flow_mod.idle_timeout,
            hard_timeout: flow_mod.hard_timeout,
            create_time: now,
            update_time_ns: AtomicU64::new(ts_nanos(now)),
            packet_count: AtomicU64::new(0),
            byte_count: AtomicU64::new(0),
            match_list,
            field_bits,
            instructions,
        }
    }

    /// Record a packet hit.
    #[inline(always)]
    pub fn hit(&self, bytes: u64, now: Timestamp) {
        self.packet_count.fetch_add(1, Ordering::Relaxed);
        self.byte_count.fetch_add(bytes, Ordering::Relaxed);
        if self.idle_timeout != 0 || self.hard_timeout != 0 {
            self.update_time_ns.store(ts_nanos(now), Ordering::Relaxed);
        }
    }

    /// Packets matched.
    pub fn packet_count(&self) -> u64 {
        self.packet_count.load(Ordering::Relaxed)
    }

    /// Bytes matched.
    pub fn byte_count(&self) -> u64 {
        self.byte_count.load(Ordering::Relaxed)
    }

    /// Last hit time in nanoseconds from the clock origin.
    pub fn update_time_ns(&self) -> u64 {
        self.update_time_ns.load(Ordering::Relaxed)
    }

    /// OFPFF_RESET_COUNTS.
    pub fn reset_counts(&self) {
        self.packet_count.store(0, Ordering::Relaxed);
        self.byte_count.store(0, Ordering::Relaxed);
    }

    /// Carry counters over from a replaced incarnation of this flow.
    pub fn adopt_counters(&self, packets: u64, bytes: u64) {
        self.packet_count.store(packets, Ordering::Relaxed);
        self.byte_count.store(bytes, Ordering::Relaxed);
    }

    /// Identity comparison for strict modify/delete and overlap detection:
    /// same priority, same field set, same ordered match list.
    pub fn same_identity(&self, priority: u16, field_bits: u64, match_list: &[Match]) -> bool {
        self.priority == priority
            && self.field_bits == field_bits
            && match_lists_equal(&self.match_list, match_list)
    }

    /// The meter id referenced by this flow, if any.
    pub fn meter_ref(&self) -> Option<u32> {
        self.instructions.meter
    }

    /// Group ids referenced from WRITE/APPLY action lists.
    pub fn group_refs(&self) -> Vec<u32> {
        let mut ids = Vec::new();
        for list in self.instructions.action_lists() {
            for action in list {
                if let ActionBody::Group(id) = action.body {
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// `true` when an OFPAT_OUTPUT to `port` exists in WRITE/APPLY lists.
    pub fn references_out_port(&self, port: u32) -> bool {
        self.instructions.action_lists().any(|list| {
            list.iter()
                .any(|a| matches!(a.body, ActionBody::Output { port: p, .. } if p == port))
        })
    }

    /// `true` when an OFPAT_GROUP to `group` exists in WRITE/APPLY lists.
    /// Groups reached transitively through buckets are not inspected.
    pub fn references_out_group(&self, group: u32) -> bool {
        self.group_refs().contains(&group)
    }

    /// Install-time annotation pass: propagate the flow cookie to OUTPUT
    /// actions, mark OUTPUTs that must transmit copies because later work
    /// still mutates the packet, and leave eth-addr copy hints on pushes.
    pub fn examine(&mut self) {
        let cookie = self.cookie;
        let mut apply_output = None;
        if let Some(apply) = self.instructions.apply_actions.as_mut() {
            apply_output = examine_action_list(apply, cookie);
        }
        // Any instruction executed after APPLY_ACTIONS keeps the packet
        // alive past the output, so the output must send a copy.
        let work_after_apply = self.instructions.clear_actions
            || self.instructions.write_actions.is_some()
            || self.instructions.write_metadata.is_some()
            || self.instructions.goto_table.is_some();
        if work_after_apply {
            if let (Some(idx), Some(apply)) =
                (apply_output, self.instructions.apply_actions.as_mut())
            {
                apply[idx].flags = OUTPUT_COPIED_PACKET;
            }
        }
        if let Some(write) = self.instructions.write_actions.as_mut() {
            for action in write.iter_mut() {
                if matches!(action.body.kind(), ActionKind::Output) {
                    action.cookie = cookie;
                }
            }
        }
    }
}

/// Annotate one action list; returns the index of the final OUTPUT.
fn examine_action_list(list: &mut ActionList, cookie: u64) -> Option<usize> {
    let mut output: Option<usize> = None;
    let mut push: Option<usize> = None;
    let mut push_flags: u32 = 0;

    for i in 0..list.len() {
        match list[i].body.kind() {
            ActionKind::PushVlan
            | ActionKind::PushMpls
            | ActionKind::PushPbb
            | ActionKind::PopVlan
            | ActionKind::PopMpls
            | ActionKind::PopPbb => {
                if let Some(o) = output {
                    list[o].flags = OUTPUT_COPIED_PACKET;
                }
                push = Some(i);
                push_flags = 0;
            }
            ActionKind::SetField => {
                if let Some(o) = output {
                    list[o].flags = OUTPUT_COPIED_PACKET;
                }
                if let Some(p) = push {
                    if let ActionBody::SetField(m) = &list[i].body {
                        if m.field == OxmField::EthDst {
                            push_flags |= SET_FIELD_ETH_DST;
                        } else if m.field == OxmField::EthSrc {
                            push_flags |= SET_FIELD_ETH_SRC;
                        }
                    }
                    list[p].flags = push_flags;
                }
            }
            ActionKind::Output => {
                if let Some(o) = output {
                    list[o].flags = OUTPUT_COPIED_PACKET;
                }
                list[i].cookie = cookie;
                output = Some(i);
            }
            _ => {}
        }
    }
    output
}

/// Flow stats multipart entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStats {
    /// Owning table.
    pub table_id: u8,
    /// Matching precedence.
    pub priority: u16,
    /// Idle timeout.
    pub idle_timeout: u16,
    /// Hard timeout.
    pub hard_timeout: u16,
    /// OFPFF_* flags.
    pub flags: u16,
    /// Controller cookie.
    pub cookie: u64,
    /// Packets matched; COUNTER_UNAVAILABLE when counting is off.
    pub packet_count: u64,
    /// Bytes matched; COUNTER_UNAVAILABLE when counting is off.
    pub byte_count: u64,
    /// Seconds alive.
    pub duration_sec: u32,
    /// Nanosecond remainder.
    pub duration_nsec: u32,
    /// Deep copy of the match list.
    pub match_list: Vec<Match>,
    /// Deep copy of the instruction list.
    pub instructions: Vec<Instruction>,
}

impl FlowStats {
    /// Snapshot a flow.
    pub fn from_flow(flow: &Flow, now: Timestamp) -> Self {
        let (duration_sec, duration_nsec) = now.duration_since(flow.create_time);
        FlowStats {
            table_id: flow.table_id,
            priority: flow.priority,
            idle_timeout: flow.idle_timeout,
            hard_timeout: flow.hard_timeout,
            flags: flow.flags,
            cookie: flow.cookie,
            packet_count: if flow.flags & OFPFF_NO_PKT_COUNTS == 0 {
                flow.packet_count()
            } else {
                COUNTER_UNAVAILABLE
            },
            byte_count: if flow.flags & OFPFF_NO_BYT_COUNTS == 0 {
                flow.byte_count()
            } else {
                COUNTER_UNAVAILABLE
            },
            duration_sec,
            duration_nsec,
            match_list: flow.match_list.clone(),
            instructions: flow.instructions.to_list(),
        }
    }
}

/// OFPT_FLOW_REMOVED payload handed to the event queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRemoved {
    /// Controller cookie.
    pub cookie: u64,
    /// Matching precedence.
    pub priority: u16,
    /// Why the flow died.
    pub reason: FlowRemovedReason,
    /// Owning table.
    pub table_id: u8,
    /// Seconds alive.
    pub duration_sec: u32,
    /// Nanosecond remainder.
    pub duration_nsec: u32,
    /// Idle timeout.
    pub idle_timeout: u16,
    /// Hard timeout.
    pub hard_timeout: u16,
    /// Packets matched; COUNTER_UNAVAILABLE when counting is off.
    pub packet_count: u64,
    /// Bytes matched; COUNTER_UNAVAILABLE when counting is off.
    pub byte_count: u64,
    /// The match list of the removed flow.
    pub match_list: Vec<Match>,
}

impl FlowRemoved {
    /// Build the removal record for a dying flow.
    pub fn from_flow(flow: &Flow, reason: FlowRemovedReason, now: Timestamp) -> Self {
        let (duration_sec, duration_nsec) = now.duration_since(flow.create_time);
        FlowRemoved {
            cookie: flow.cookie,
            priority: flow.priority,
            reason,
            table_id: flow.table_id,
            duration_sec,
            duration_nsec,
            idle_timeout: flow.idle_timeout,
            hard_timeout: flow.hard_timeout,
            packet_count: if flow.flags & OFPFF_NO_PKT_COUNTS == 0 {
                flow.packet_count()
            } else {
                COUNTER_UNAVAILABLE
            },
            byte_count: if flow.flags & OFPFF_NO_BYT_COUNTS == 0 {
                flow.byte_count()
            } else {
                COUNTER_UNAVAILABLE
            },
            match_list: flow.match_list.clone(),
        }
    }
}
