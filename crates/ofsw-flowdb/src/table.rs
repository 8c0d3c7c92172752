//! A single flow table
//!
//! The flow list is kept sorted by descending priority; among equal
//! priorities the earlier-inserted entry comes first, so insertion order
//! breaks ties during lookup.

use std::sync::Arc;

use ofsw_common::AtomicCounter;
use serde::{Deserialize, Serialize};

use crate::flow::{Flow, FlowId};

/// One table of the flow pipeline.
#[derive(Debug, Default)]
pub struct Table {
    /// Flow entries, priority-descending.
    flows: Vec<Arc<Flow>>,
    /// Packets looked up in this table.
    pub lookup_count: AtomicCounter,
    /// Packets matched by a flow with priority > 0.
    pub matched_count: AtomicCounter,
}

/// Table stats multipart entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStats {
    /// Table id.
    pub table_id: u8,
    /// Live flow entries.
    pub active_count: u32,
    /// Lookups attempted.
    pub lookup_count: u64,
    /// Lookups that matched.
    pub matched_count: u64,
}

impl Table {
    /// Empty table.
    pub fn new() -> Self {
        Table::default()
    }

    /// Flows in priority order.
    pub fn flows(&self) -> &[Arc<Flow>] {
        &self.flows
    }

    /// Number of flow entries.
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// `true` when no flows are installed.
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Insert keeping priority order; equal priorities go after existing
    /// entries so the earlier install wins ties.
    pub fn insert(&mut self, flow: Arc<Flow>) {
        let mut lo = 0usize;
        let mut hi = self.flows.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.flows[mid].priority >= flow.priority {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        self.flows.insert(lo, flow);
    }

    /// Find a flow with identical (priority, match) identity.
    pub fn find_identical(
        &self,
        priority: u16,
        field_bits: u64,
        match_list: &[crate::oxm::Match],
    ) -> Option<&Arc<Flow>> {
        self.flows
            .iter()
            .find(|f| f.same_identity(priority, field_bits, match_list))
    }

    /// Replace the entry holding `id` in place, preserving its position.
    pub fn replace(&mut self, id: FlowId, flow: Arc<Flow>) {
        if let Some(slot) = self.flows.iter_mut().find(|f| f.id == id) {
            *slot = flow;
        }
    }

    /// Remove and return the flow with the given id.
    pub fn remove(&mut self, id: FlowId) -> Option<Arc<Flow>> {
        let idx = self.flows.iter().position(|f| f.id == id)?;
        Some(self.flows.remove(idx))
    }

    /// Retain only flows the predicate keeps; returns the removed ones in
    /// priority order.
    pub fn extract_if<F: FnMut(&Arc<Flow>) -> bool>(&mut self, mut remove: F) -> Vec<Arc<Flow>> {
        let mut removed = Vec::new();
        let mut i = 0;
        while i < self.flows.len() {
            if remove(&self.flows[i]) {
                removed.push(self.flows.remove(i));
            } else {
                i += 1;
            }
        }
        removed
    }

    /// Stats snapshot.
    pub fn stats(&self, table_id: u8) -> TableStats {
        TableStats {
            table_id,
            active_count: self.flows.len() as u32,
            lookup_count: self.lookup_count.get(),
            matched_count: self.matched_count.get(),
        }
    }

    /// Check the priority-descending invariant (test support).
    pub fn is_priority_sorted(&self) -> bool {
        self.flows
            .windows(2)
            .all(|w| w[0].priority >= w[1].priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::InstructionSet;
    use crate::msgs::FlowMod;
    use crate::oxm::{check_prerequisites, Match};
    use ofsw_common::Timestamp;

    fn flow(id: FlowId, priority: u16, port: u32) -> Arc<Flow> {
        let ml = vec![Match::in_port(port)];
        let bits = check_prerequisites(&ml).unwrap();
        Arc::new(Flow::new(
            id,
            &FlowMod::add(0, priority),
            ml,
            bits,
            InstructionSet::default(),
            Timestamp::ZERO,
        ))
    }

    #[test]
    fn test_priority_order() {
        let mut t = Table::new();
        t.insert(flow(1, 10, 1));
        t.insert(flow(2, 100, 1));
        t.insert(flow(3, 50, 1));
        let prios: Vec<u16> = t.flows().iter().map(|f| f.priority).collect();
        assert_eq!(prios, vec![100, 50, 10]);
        assert!(t.is_priority_sorted());
    }

    #[test]
    fn test_equal_priority_insertion_order() {
        let mut t = Table::new();
        t.insert(flow(1, 10, 1));
        t.insert(flow(2, 10, 2));
        let ids: Vec<FlowId> = t.flows().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_remove_and_extract() {
        let mut t = Table::new();
        t.insert(flow(1, 10, 1));
        t.insert(flow(2, 20, 2));
        t.insert(flow(3, 30, 3));
        assert!(t.remove(2).is_some());
        assert_eq!(t.len(), 2);
        let removed = t.extract_if(|f| f.priority >= 30);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, 3);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_find_identical() {
        let mut t = Table::new();
        t.insert(flow(1, 10, 1));
        let ml = vec![Match::in_port(1)];
        let bits = check_prerequisites(&ml).unwrap();
        assert!(t.find_identical(10, bits, &ml).is_some());
        assert!(t.find_identical(11, bits, &ml).is_none());
        let other = vec![Match::in_port(9)];
        assert!(t.find_identical(10, bits, &other).is_none());
    }
}
