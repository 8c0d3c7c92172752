//! Decoded control-plane messages
//!
//! The wire codec lives outside the core; these are the already-decoded
//! shapes the tables consume.

use ofsw_common::openflow::{
    FlowModCommand, GroupModCommand, GroupType, MeterModCommand, OFPG_ANY, OFPP_ANY,
};
use serde::{Deserialize, Serialize};

/// Decoded OFPT_FLOW_MOD header fields. The match and instruction lists
/// travel beside this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowMod {
    /// Target table.
    pub table_id: u8,
    /// Add/modify/delete, strict or not.
    pub command: FlowModCommand,
    /// Seconds of inactivity before removal; zero disables.
    pub idle_timeout: u16,
    /// Seconds of lifetime before removal; zero disables.
    pub hard_timeout: u16,
    /// Matching precedence.
    pub priority: u16,
    /// Opaque controller cookie.
    pub cookie: u64,
    /// Cookie filter for modify/delete.
    pub cookie_mask: u64,
    /// Output-port filter for delete; OFPP_ANY disables.
    pub out_port: u32,
    /// Output-group filter for delete; OFPG_ANY disables.
    pub out_group: u32,
    /// OFPFF_* flags.
    pub flags: u16,
}

impl FlowMod {
    /// An add request with the common defaults.
    pub fn add(table_id: u8, priority: u16) -> Self {
        FlowMod {
            table_id,
            command: FlowModCommand::Add,
            idle_timeout: 0,
            hard_timeout: 0,
            priority,
            cookie: 0,
            cookie_mask: 0,
            out_port: OFPP_ANY,
            out_group: OFPG_ANY,
            flags: 0,
        }
    }

    /// A delete request over one table (or OFPTT_ALL).
    pub fn delete(table_id: u8) -> Self {
        FlowMod {
            command: FlowModCommand::Delete,
            ..FlowMod::add(table_id, 0)
        }
    }
}

/// Decoded OFPT_GROUP_MOD header fields; the bucket list travels beside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMod {
    /// Add/modify/delete.
    pub command: GroupModCommand,
    /// Group behavior.
    pub gtype: GroupType,
    /// Group id.
    pub group_id: u32,
}

/// Decoded OFPT_METER_MOD header fields; the band list travels beside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterMod {
    /// Add/modify/delete.
    pub command: MeterModCommand,
    /// OFPMF_* flags.
    pub flags: u16,
    /// Meter id.
    pub meter_id: u32,
}

/// Flow stats / aggregate stats request filter. The match list travels
/// beside this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStatsRequest {
    /// Table to query, or OFPTT_ALL.
    pub table_id: u8,
    /// Output-port filter; OFPP_ANY disables.
    pub out_port: u32,
    /// Output-group filter; OFPG_ANY disables.
    pub out_group: u32,
    /// Cookie filter.
    pub cookie: u64,
    /// Cookie filter mask; zero disables.
    pub cookie_mask: u64,
}

impl FlowStatsRequest {
    /// Query every table with no filters.
    pub fn all() -> Self {
        FlowStatsRequest {
            table_id: ofsw_common::openflow::OFPTT_ALL,
            out_port: OFPP_ANY,
            out_group: OFPG_ANY,
            cookie: 0,
            cookie_mask: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_mod_defaults() {
        let fm = FlowMod::add(0, 100);
        assert_eq!(fm.out_port, OFPP_ANY);
        assert_eq!(fm.out_group, OFPG_ANY);
        assert_eq!(fm.command, FlowModCommand::Add);
    }

    #[test]
    fn test_flow_mod_serde_roundtrip() {
        let mut fm = FlowMod::add(3, 42);
        fm.cookie = 0xdead_beef;
        fm.idle_timeout = 30;
        let json = serde_json::to_string(&fm).unwrap();
        let back: FlowMod = serde_json::from_str(&json).unwrap();
        assert_eq!(back.table_id, 3);
        assert_eq!(back.priority, 42);
        assert_eq!(back.cookie, 0xdead_beef);
        assert_eq!(back.idle_timeout, 30);
    }
}
