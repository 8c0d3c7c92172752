//! Model-based checks of the prefix tree against a naive implementation.

use ofsw_ptree::PrefixTree;
use proptest::prelude::*;

/// Naive longest-prefix match over a list of (key, len) prefixes.
fn naive_lpm(prefixes: &[(u32, u16)], addr: u32) -> Option<(u32, u16)> {
    prefixes
        .iter()
        .filter(|(key, len)| {
            let mask = if *len == 0 { 0 } else { u32::MAX << (32 - len) };
            addr & mask == key & mask
        })
        .max_by_key(|(_, len)| *len)
        .copied()
}

proptest! {
    #[test]
    fn lpm_matches_naive_model(
        prefixes in proptest::collection::vec((any::<u32>(), 1u16..=32), 1..24),
        addrs in proptest::collection::vec(any::<u32>(), 1..16),
    ) {
        let mut tree = PrefixTree::new(32).unwrap();
        let mut held = Vec::new();
        let mut canonical: Vec<(u32, u16)> = Vec::new();

        for (key, len) in &prefixes {
            let masked = if *len == 0 { 0 } else { key & (u32::MAX << (32 - len)) };
            let node = tree.insert(&masked.to_be_bytes(), *len).unwrap();
            tree.set_info(node, (masked, *len));
            held.push(node);
            if !canonical.contains(&(masked, *len)) {
                canonical.push((masked, *len));
            }
        }

        for addr in &addrs {
            let expect = naive_lpm(&canonical, *addr);
            let got = tree.match_longest(&addr.to_be_bytes(), 32);
            match (expect, got) {
                (None, None) => {}
                (Some(want), Some(node)) => {
                    prop_assert_eq!(tree.info(node).copied(), Some(want));
                    tree.release_keep(node);
                }
                (want, got) => {
                    prop_assert!(false, "mismatch: want {:?}, got {:?}", want, got.is_some());
                }
            }
        }

        for node in held {
            tree.release(node);
        }
    }

    #[test]
    fn exact_lookup_roundtrip(
        prefixes in proptest::collection::vec((any::<u32>(), 1u16..=32), 1..24),
    ) {
        let mut tree = PrefixTree::new(32).unwrap();
        let mut held = Vec::new();
        for (key, len) in &prefixes {
            let masked = if *len == 0 { 0 } else { key & (u32::MAX << (32 - len)) };
            let node = tree.insert(&masked.to_be_bytes(), *len).unwrap();
            tree.set_info(node, masked);
            held.push((node, masked, *len));
        }
        for (node, masked, len) in &held {
            let found = tree.lookup(&masked.to_be_bytes(), *len).unwrap();
            prop_assert_eq!(found, *node);
            tree.release_keep(found);
        }
        for (node, _, _) in held {
            tree.release(node);
        }
    }
}
