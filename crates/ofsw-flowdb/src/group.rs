//! OpenFlow group table
//!
//! Groups own buckets; buckets carry a raw action list plus a pre-merged
//! action set so execution does not rebuild the write-set per packet.
//! Flow back-references are held as flow ids (never pointers); deleting a
//! group hands the referent flows back to the caller for removal under the
//! already-held write lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use ofsw_common::error::{group_mod_failed, OfpErrorType};
use ofsw_common::openflow::{
    GroupType, OFPGFC_CHAINING, OFPGFC_CHAINING_CHECKS, OFPG_ALL, OFPG_ANY, OFPG_MAX,
};
use ofsw_common::{SwitchError, SwitchResult, Timestamp};
use serde::{Deserialize, Serialize};

use crate::action::{ActionBody, ActionList, ActionSet};
use crate::flow::FlowId;
use crate::msgs::GroupMod;

/// One group bucket.
#[derive(Debug)]
pub struct Bucket {
    /// Relative weight for SELECT groups.
    pub weight: u16,
    /// Port whose liveness gates this bucket (fast failover).
    pub watch_port: u32,
    /// Group whose liveness gates this bucket (fast failover).
    pub watch_group: u32,
    /// Raw configured action list.
    pub actions: ActionList,
    /// Pre-merged write-set of `actions`.
    pub action_set: ActionSet,
    packet_count: AtomicU64,
    byte_count: AtomicU64,
}

impl Bucket {
    /// Build a bucket and pre-merge its action set.
    pub fn new(weight: u16, watch_port: u32, watch_group: u32, actions: ActionList) -> Self {
        let mut action_set = ActionSet::new();
        action_set.merge(&actions);
        Bucket {
            weight,
            watch_port,
            watch_group,
            actions,
            action_set,
            packet_count: AtomicU64::new(0),
            byte_count: AtomicU64::new(0),
        }
    }

    /// A weightless bucket watching nothing.
    pub fn with_actions(actions: ActionList) -> Self {
        Bucket::new(0, ofsw_common::openflow::OFPP_ANY, OFPG_ANY, actions)
    }

    /// Record a packet through this bucket.
    #[inline(always)]
    pub fn hit(&self, bytes: u64) {
        self.packet_count.fetch_add(1, Ordering::Relaxed);
        self.byte_count.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Packets through this bucket.
    pub fn packet_count(&self) -> u64 {
        self.packet_count.load(Ordering::Relaxed)
    }

    /// Bytes through this bucket.
    pub fn byte_count(&self) -> u64 {
        self.byte_count.load(Ordering::Relaxed)
    }

    /// Propagate a flow cookie onto the bucket's OUTPUT actions so
    /// packet-ins attribute to the triggering flow.
    pub fn set_output_cookies(&mut self, cookie: u64) {
        for action in self.actions.iter_mut() {
            if matches!(action.body, ActionBody::Output { .. }) {
                action.cookie = cookie;
            }
        }
        let mut set = ActionSet::new();
        set.merge(&self.actions);
        self.action_set = set;
    }
}

/// One group.
#[derive(Debug)]
pub struct Group {
    /// Group id.
    pub id: u32,
    /// Group behavior.
    pub gtype: GroupType,
    /// Buckets in configuration order.
    pub buckets: Vec<Bucket>,
    /// Install time.
    pub create_time: Timestamp,
    /// Back-references: flow id to its table, for OFPRR_GROUP_DELETE.
    pub flows: HashMap<FlowId, u8>,
    packet_count: AtomicU64,
    byte_count: AtomicU64,
}

impl Group {
    fn new(group_mod: &GroupMod, buckets: Vec<Bucket>, now: Timestamp) -> Self {
        Group {
            id: group_mod.group_id,
            gtype: group_mod.gtype,
            buckets,
            create_time: now,
            flows: HashMap::new(),
            packet_count: AtomicU64::new(0),
            byte_count: AtomicU64::new(0),
        }
    }

    /// Record a packet through this group.
    #[inline(always)]
    pub fn hit(&self, bytes: u64) {
        self.packet_count.fetch_add(1, Ordering::Relaxed);
        self.byte_count.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Packets through this group.
    pub fn packet_count(&self) -> u64 {
        self.packet_count.load(Ordering::Relaxed)
    }

    /// Bytes through this group.
    pub fn byte_count(&self) -> u64 {
        self.byte_count.load(Ordering::Relaxed)
    }

    /// Group ids referenced by bucket actions.
    fn chained_group_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.buckets.iter().flat_map(|b| {
            b.actions.iter().filter_map(|a| match a.body {
                ActionBody::Group(id) => Some(id),
                _ => None,
            })
        })
    }
}

/// Group stats multipart entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupStats {
    /// Group id.
    pub group_id: u32,
    /// Number of flows referencing the group.
    pub ref_count: u32,
    /// Packets through the group.
    pub packet_count: u64,
    /// Bytes through the group.
    pub byte_count: u64,
    /// Seconds alive.
    pub duration_sec: u32,
    /// Nanosecond remainder.
    pub duration_nsec: u32,
    /// Per-bucket (packets, bytes).
    pub bucket_stats: Vec<(u64, u64)>,
}

/// Group description multipart entry.
#[derive(Debug, Clone)]
pub struct GroupDesc {
    /// Group behavior.
    pub gtype: GroupType,
    /// Group id.
    pub group_id: u32,
    /// Bucket configuration: (weight, watch_port, watch_group, actions).
    pub buckets: Vec<(u16, u32, u32, ActionList)>,
}

/// Group features multipart reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupFeatures {
    /// Bitmap of supported group types.
    pub types: u32,
    /// Capability bits.
    pub capabilities: u32,
    /// Max groups per type, indexed by type.
    pub max_groups: [u32; 4],
    /// Supported action bitmaps per type.
    pub actions: [u32; 4],
}

/// The per-bridge group table.
#[derive(Debug, Default)]
pub struct GroupTable {
    groups: HashMap<u32, Group>,
}

fn group_err(code: u16) -> SwitchError {
    SwitchError::ofp(OfpErrorType::GroupModFailed, code)
}

/// INDIRECT groups carry exactly one bucket.
fn check_bucket_count(gtype: GroupType, buckets: &[Bucket]) -> SwitchResult<()> {
    if gtype == GroupType::Indirect && buckets.len() != 1 {
        tracing::info!(
            nbuckets = buckets.len(),
            "indirect group needs exactly one bucket"
        );
        return Err(group_err(group_mod_failed::INVALID_GROUP));
    }
    Ok(())
}

impl GroupTable {
    /// Empty table.
    pub fn new() -> Self {
        GroupTable::default()
    }

    /// Depth-first walk over bucket group actions and watch groups: `true`
    /// when `group` can reach `id`.
    fn reaches(&self, group: &Group, id: u32) -> bool {
        for gid in group.chained_group_ids() {
            if gid == id {
                return true;
            }
            if let Some(next) = self.groups.get(&gid) {
                if self.reaches(next, id) {
                    return true;
                }
            }
        }
        for bucket in &group.buckets {
            if bucket.watch_group == id {
                return true;
            }
            if bucket.watch_group != OFPG_ANY {
                if let Some(next) = self.groups.get(&bucket.watch_group) {
                    if self.reaches(next, id) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// OFPGC_ADD.
    pub fn add(
        &mut self,
        group_mod: &GroupMod,
        buckets: Vec<Bucket>,
        now: Timestamp,
    ) -> SwitchResult<()> {
        if self.groups.contains_key(&group_mod.group_id) {
            tracing::info!(group_id = group_mod.group_id, "group add: group exists");
            return Err(group_err(group_mod_failed::GROUP_EXISTS));
        }
        check_bucket_count(group_mod.gtype, &buckets)?;
        let group = Group::new(group_mod, buckets, now);
        if self.reaches(&group, group.id) {
            tracing::info!(group_id = group.id, "group add: loop detected");
            return Err(group_err(group_mod_failed::LOOP));
        }
        self.groups.insert(group.id, group);
        Ok(())
    }

    /// OFPGC_MODIFY: replaces type and buckets in place, keeping counters
    /// and flow back-references.
    pub fn modify(&mut self, group_mod: &GroupMod, buckets: Vec<Bucket>) -> SwitchResult<()> {
        check_bucket_count(group_mod.gtype, &buckets)?;
        match self.groups.get_mut(&group_mod.group_id) {
            Some(group) => {
                group.gtype = group_mod.gtype;
                group.buckets = buckets;
                Ok(())
            }
            None => {
                tracing::info!(group_id = group_mod.group_id, "group modify: no such group");
                Err(group_err(group_mod_failed::UNKNOWN_GROUP))
            }
        }
    }

    /// OFPGC_DELETE; OFPG_ALL clears the table. Returns the referent flows
    /// (flow id, table id) the caller must remove with OFPRR_GROUP_DELETE.
    pub fn delete(&mut self, group_id: u32) -> Vec<(FlowId, u8)> {
        let mut referents = Vec::new();
        if group_id == OFPG_ALL {
            for (_, group) in self.groups.drain() {
                referents.extend(group.flows.iter().map(|(id, t)| (*id, *t)));
            }
        } else if let Some(group) = self.groups.remove(&group_id) {
            referents.extend(group.flows.iter().map(|(id, t)| (*id, *t)));
        }
        referents.sort_unstable();
        referents.dedup();
        referents
    }

    /// Lookup by id.
    pub fn get(&self, group_id: u32) -> Option<&Group> {
        self.groups.get(&group_id)
    }

    /// Mutable lookup by id.
    pub fn get_mut(&mut self, group_id: u32) -> Option<&mut Group> {
        self.groups.get_mut(&group_id)
    }

    /// `true` when the group exists.
    pub fn contains(&self, group_id: u32) -> bool {
        self.groups.contains_key(&group_id)
    }

    /// Number of groups installed.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// `true` when no groups are installed.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Register a flow back-reference.
    pub fn add_flow_ref(&mut self, group_id: u32, flow_id: FlowId, table_id: u8) {
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.flows.insert(flow_id, table_id);
        }
    }

    /// Drop a flow back-reference.
    pub fn remove_flow_ref(&mut self, group_id: u32, flow_id: FlowId) {
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.flows.remove(&flow_id);
        }
    }

    /// Group stats for one group or OFPG_ALL.
    pub fn stats(&self, group_id: u32, now: Timestamp) -> Vec<GroupStats> {
        let snapshot = |group: &Group| {
            let (duration_sec, duration_nsec) = now.duration_since(group.create_time);
            GroupStats {
                group_id: group.id,
                ref_count: group.flows.len() as u32,
                packet_count: group.packet_count(),
                byte_count: group.byte_count(),
                duration_sec,
                duration_nsec,
                bucket_stats: group
                    .buckets
                    .iter()
                    .map(|b| (b.packet_count(), b.byte_count()))
                    .collect(),
            }
        };
        if group_id == OFPG_ALL {
            let mut out: Vec<GroupStats> = self.groups.values().map(snapshot).collect();
            out.sort_by_key(|s| s.group_id);
            out
        } else {
            self.groups.get(&group_id).map(snapshot).into_iter().collect()
        }
    }

    /// Group descriptions for every group.
    pub fn descs(&self) -> Vec<GroupDesc> {
        let mut out: Vec<GroupDesc> = self
            .groups
            .values()
            .map(|group| GroupDesc {
                gtype: group.gtype,
                group_id: group.id,
                buckets: group
                    .buckets
                    .iter()
                    .map(|b| (b.weight, b.watch_port, b.watch_group, b.actions.clone()))
                    .collect(),
            })
            .collect();
        out.sort_by_key(|d| d.group_id);
        out
    }

    /// Advertised group features: ALL/SELECT/INDIRECT supported with
    /// chaining checks; fast failover is executed but not advertised.
    pub fn features(&self) -> GroupFeatures {
        let action_bits = |kinds: &[u16]| kinds.iter().fold(0u32, |acc, k| acc | (1 << k));
        let supported = action_bits(&[0, 11, 12, 15, 16, 17, 18, 19, 20, 22, 23, 24, 25, 26, 27]);
        GroupFeatures {
            types: (1 << GroupType::All as u32)
                | (1 << GroupType::Select as u32)
                | (1 << GroupType::Indirect as u32),
            capabilities: OFPGFC_CHAINING | OFPGFC_CHAINING_CHECKS,
            max_groups: [OFPG_MAX, OFPG_MAX, OFPG_MAX, 0],
            actions: [supported, supported, supported, 0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use ofsw_common::openflow::GroupModCommand;

    fn gmod(id: u32, gtype: GroupType) -> GroupMod {
        GroupMod {
            command: GroupModCommand::Add,
            gtype,
            group_id: id,
        }
    }

    fn group_bucket(target: u32) -> Bucket {
        Bucket::with_actions(vec![Action::new(ActionBody::Group(target))])
    }

    #[test]
    fn test_add_exists() {
        let mut t = GroupTable::new();
        t.add(&gmod(1, GroupType::All), vec![], Timestamp::ZERO)
            .unwrap();
        let err = t
            .add(&gmod(1, GroupType::All), vec![], Timestamp::ZERO)
            .unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, group_mod_failed::GROUP_EXISTS);
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut t = GroupTable::new();
        let err = t
            .add(
                &gmod(1, GroupType::All),
                vec![group_bucket(1)],
                Timestamp::ZERO,
            )
            .unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, group_mod_failed::LOOP);
    }

    #[test]
    fn test_chain_loop_rejected() {
        let mut t = GroupTable::new();
        // Forward reference to a not-yet-existing group is allowed.
        t.add(
            &gmod(2, GroupType::All),
            vec![group_bucket(3)],
            Timestamp::ZERO,
        )
        .unwrap();
        // Adding 3 -> 2 closes 3 -> 2 -> 3.
        let err = t
            .add(
                &gmod(3, GroupType::All),
                vec![group_bucket(2)],
                Timestamp::ZERO,
            )
            .unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, group_mod_failed::LOOP);
    }

    #[test]
    fn test_watch_group_loop_rejected() {
        let mut t = GroupTable::new();
        let bucket = Bucket::new(0, ofsw_common::openflow::OFPP_ANY, 4, vec![]);
        let err = t
            .add(&gmod(4, GroupType::FastFailover), vec![bucket], Timestamp::ZERO)
            .unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, group_mod_failed::LOOP);
    }

    #[test]
    fn test_indirect_needs_exactly_one_bucket() {
        let mut t = GroupTable::new();
        let err = t
            .add(&gmod(1, GroupType::Indirect), vec![], Timestamp::ZERO)
            .unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, group_mod_failed::INVALID_GROUP);

        let two = vec![
            Bucket::with_actions(vec![Action::output(2)]),
            Bucket::with_actions(vec![Action::output(3)]),
        ];
        let err = t
            .add(&gmod(1, GroupType::Indirect), two, Timestamp::ZERO)
            .unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, group_mod_failed::INVALID_GROUP);

        t.add(
            &gmod(1, GroupType::Indirect),
            vec![Bucket::with_actions(vec![Action::output(2)])],
            Timestamp::ZERO,
        )
        .unwrap();

        // Modify is held to the same rule.
        let err = t
            .modify(
                &gmod(1, GroupType::Indirect),
                vec![
                    Bucket::with_actions(vec![Action::output(2)]),
                    Bucket::with_actions(vec![Action::output(3)]),
                ],
            )
            .unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, group_mod_failed::INVALID_GROUP);
        assert_eq!(t.get(1).unwrap().buckets.len(), 1);
    }

    #[test]
    fn test_acyclic_chain_accepted() {
        let mut t = GroupTable::new();
        t.add(&gmod(1, GroupType::All), vec![], Timestamp::ZERO)
            .unwrap();
        t.add(
            &gmod(2, GroupType::All),
            vec![group_bucket(1)],
            Timestamp::ZERO,
        )
        .unwrap();
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_delete_returns_referents() {
        let mut t = GroupTable::new();
        t.add(&gmod(1, GroupType::All), vec![], Timestamp::ZERO)
            .unwrap();
        t.add_flow_ref(1, 42, 0);
        t.add_flow_ref(1, 43, 2);
        let mut refs = t.delete(1);
        refs.sort_unstable();
        assert_eq!(refs, vec![(42, 0), (43, 2)]);
        assert!(t.is_empty());
    }

    #[test]
    fn test_stats_ref_count() {
        let mut t = GroupTable::new();
        t.add(
            &gmod(1, GroupType::All),
            vec![Bucket::with_actions(vec![Action::output(2)])],
            Timestamp::ZERO,
        )
        .unwrap();
        t.add_flow_ref(1, 7, 0);
        let g = t.get(1).unwrap();
        g.hit(100);
        g.buckets[0].hit(100);
        let stats = t.stats(1, Timestamp { sec: 1, nsec: 0 });
        assert_eq!(stats[0].ref_count, 1);
        assert_eq!(stats[0].packet_count, 1);
        assert_eq!(stats[0].bucket_stats, vec![(1, 100)]);
    }

    #[test]
    fn test_features() {
        let t = GroupTable::new();
        let f = t.features();
        assert_ne!(f.types & (1 << GroupType::All as u32), 0);
        assert_eq!(f.types & (1 << GroupType::FastFailover as u32), 0);
        assert_eq!(f.max_groups[3], 0);
    }
}
