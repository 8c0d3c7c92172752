//! OpenSwitch flow, group and meter tables
//!
//! The control-plane side of the dataplane core: validated flow entries in
//! priority-ordered tables, the group table with chain-loop detection and
//! flow back-references, and the meter table with its coloring oracle
//! seam. Execution against packets lives in `ofsw-dataplane`.

#![warn(missing_docs)]

pub mod action;
pub mod flow;
pub mod flowdb;
pub mod group;
pub mod instruction;
pub mod meter;
pub mod msgs;
pub mod oxm;
pub mod table;

pub use action::{
    action_set_order, Action, ActionBody, ActionList, ActionSet, ACTION_SET_ORDER_MAX,
    OUTPUT_COPIED_PACKET, SET_FIELD_ETH_DST, SET_FIELD_ETH_SRC,
};
pub use flow::{Flow, FlowId, FlowRemoved, FlowStats};
pub use flowdb::{AggregateStats, FlowDb, PortLookup, SwitchTables};
pub use group::{Bucket, Group, GroupDesc, GroupFeatures, GroupStats, GroupTable};
pub use instruction::{Instruction, InstructionSet};
pub use meter::{
    remark_dscp, Meter, MeterBand, MeterConfig, MeterEffect, MeterFeatures, MeterPolicer,
    MeterStats, MeterTable, NullPolicer,
};
pub use msgs::{FlowMod, FlowStatsRequest, GroupMod, MeterMod};
pub use oxm::{check_masks, check_prerequisites, match_lists_equal, match_subsumes, Match};
pub use table::{Table, TableStats};
