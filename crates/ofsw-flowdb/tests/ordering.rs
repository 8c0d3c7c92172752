//! Property tests over table ordering and the action-set merge rule.

use ofsw_flowdb::flowdb::{PortLookup, SwitchTables};
use ofsw_flowdb::msgs::FlowMod;
use ofsw_flowdb::oxm::Match;
use ofsw_flowdb::{Action, ActionBody, ActionSet};
use ofsw_common::openflow::FlowModCommand;
use ofsw_common::Timestamp;
use proptest::prelude::*;

struct AllPorts;
impl PortLookup for AllPorts {
    fn port_exists(&self, _p: u32) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
enum Op {
    Add { priority: u16, in_port: u32 },
    Delete { in_port: u32 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u16..200, 1u32..8).prop_map(|(priority, in_port)| Op::Add { priority, in_port }),
        (1u32..8).prop_map(|in_port| Op::Delete { in_port }),
    ]
}

proptest! {
    /// After any sequence of adds and deletes every table stays sorted by
    /// descending priority, and field_bits always mirrors the match list.
    #[test]
    fn flow_list_stays_priority_sorted(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let mut tables = SwitchTables::new();
        for op in ops {
            match op {
                Op::Add { priority, in_port } => {
                    tables
                        .flow_add(
                            &AllPorts,
                            &FlowMod::add(0, priority),
                            vec![Match::in_port(in_port)],
                            vec![],
                            Timestamp::ZERO,
                        )
                        .unwrap();
                }
                Op::Delete { in_port } => {
                    let mut fm = FlowMod::delete(0);
                    fm.command = FlowModCommand::Delete;
                    tables
                        .flow_delete(&fm, vec![Match::in_port(in_port)], Timestamp::ZERO)
                        .unwrap();
                }
            }
            if let Some(table) = tables.flowdb.table(0) {
                prop_assert!(table.is_priority_sorted());
                for flow in table.flows() {
                    let bits: u64 = flow.match_list.iter().map(|m| m.field.bit()).sum();
                    prop_assert_eq!(flow.field_bits, bits);
                }
            }
        }
    }

    /// The merged action set never holds two actions of the same kind
    /// (same field for set-field) in one slot.
    #[test]
    fn action_set_at_most_one_per_type(ports in proptest::collection::vec(1u32..6, 1..20)) {
        let mut set = ActionSet::new();
        for p in &ports {
            set.merge(&[Action::output(*p)]);
            set.merge(&[Action::new(ActionBody::SetQueue(*p))]);
        }
        let outputs = &set.slots()[10];
        prop_assert_eq!(outputs.len(), 1);
        prop_assert!(
            matches!(
                outputs[0].body,
                ActionBody::Output { port, .. } if port == *ports.last().unwrap()
            ),
            "expected last output port to win"
        );
        prop_assert_eq!(set.slots()[8].len(), 1);
    }
}
