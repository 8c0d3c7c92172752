//! Hybrid L3 forwarding over the prefix tree
//!
//! The OFPP_NORMAL fallback: a longest-prefix route lookup that rewrites
//! the Ethernet addresses, decrements the TTL and transmits on the route's
//! port. Routes live in a [`PrefixTree`] keyed by destination prefix.

use parking_lot::Mutex;

use ofsw_common::openflow::{ETHERTYPE_IPV4, ETHERTYPE_IPV6};
use ofsw_common::{MacAddr, SwitchResult};
use ofsw_packet::Packet;
use ofsw_ptree::PrefixTree;

use crate::actions;
use crate::pipeline::PipelineEnv;

/// Resolved next hop of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextHop {
    /// Egress port.
    pub out_port: u32,
    /// Source address to write (the egress interface address).
    pub src_mac: MacAddr,
    /// Destination address to write (the neighbor address).
    pub dst_mac: MacAddr,
}

/// Routes for the non-OpenFlow forwarding fallback.
pub struct HybridRouter {
    v4: Mutex<PrefixTree<NextHop>>,
    v6: Mutex<PrefixTree<NextHop>>,
}

impl HybridRouter {
    /// Empty routing tables.
    pub fn new() -> SwitchResult<Self> {
        Ok(HybridRouter {
            v4: Mutex::new(PrefixTree::new(32)?),
            v6: Mutex::new(PrefixTree::new(128)?),
        })
    }

    /// Install an IPv4 route.
    pub fn add_route_v4(&self, prefix: [u8; 4], prefix_len: u16, next_hop: NextHop) -> SwitchResult<()> {
        let mut tree = self.v4.lock();
        let node = tree.insert(&prefix, prefix_len)?;
        tree.set_info(node, next_hop);
        Ok(())
    }

    /// Install an IPv6 route.
    pub fn add_route_v6(
        &self,
        prefix: [u8; 16],
        prefix_len: u16,
        next_hop: NextHop,
    ) -> SwitchResult<()> {
        let mut tree = self.v6.lock();
        let node = tree.insert(&prefix, prefix_len)?;
        tree.set_info(node, next_hop);
        Ok(())
    }

    /// Remove an IPv4 route.
    pub fn del_route_v4(&self, prefix: [u8; 4], prefix_len: u16) {
        let mut tree = self.v4.lock();
        if let Some(node) = tree.lookup(&prefix, prefix_len) {
            tree.clear_info(node);
            tree.release(node);
        }
    }

    /// Longest-prefix lookup of an IPv4 destination.
    pub fn lookup_v4(&self, addr: [u8; 4]) -> Option<NextHop> {
        let tree = self.v4.lock();
        let node = tree.match_longest(&addr, 32)?;
        let hop = tree.info(node).copied();
        tree.release_keep(node);
        hop
    }

    /// Longest-prefix lookup of an IPv6 destination.
    pub fn lookup_v6(&self, addr: [u8; 16]) -> Option<NextHop> {
        let tree = self.v6.lock();
        let node = tree.match_longest(&addr, 128)?;
        let hop = tree.info(node).copied();
        tree.release_keep(node);
        hop
    }

    fn route_for(&self, pkt: &Packet) -> Option<NextHop> {
        let l3 = pkt.l3?;
        let d = pkt.data();
        if pkt.ether_type == ETHERTYPE_IPV4 && d.len() >= l3 + 20 {
            let mut dst = [0u8; 4];
            dst.copy_from_slice(&d[l3 + 16..l3 + 20]);
            self.lookup_v4(dst)
        } else if pkt.ether_type == ETHERTYPE_IPV6 && d.len() >= l3 + 40 {
            let mut dst = [0u8; 16];
            dst.copy_from_slice(&d[l3 + 24..l3 + 40]);
            self.lookup_v6(dst)
        } else {
            None
        }
    }

    /// Forward a packet the OpenFlow pipeline handed to OFPP_NORMAL:
    /// rewrite the Ethernet header toward the next hop, decrement the TTL
    /// and transmit. Packets with no route or an expiring TTL are dropped.
    pub fn forward(&self, env: &PipelineEnv<'_>, pkt: &mut Packet) {
        let hop = match self.route_for(pkt) {
            Some(hop) => hop,
            None => {
                tracing::debug!("no route for OFPP_NORMAL packet, dropping");
                return;
            }
        };
        if pkt.len() >= 12 {
            let d = pkt.data_mut();
            d[0..6].copy_from_slice(&hop.dst_mac.0);
            d[6..12].copy_from_slice(&hop.src_mac.0);
        }
        if actions::dec_nw_ttl(pkt) == actions::Exec::Stop {
            tracing::debug!("TTL expired on routed packet, dropping");
            return;
        }
        let port = match env.ports.get(&hop.out_port) {
            Some(entry) if entry.can_forward() => entry.value().clone(),
            _ => return,
        };
        actions::send_to_port(env, pkt, &port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(port: u32) -> NextHop {
        NextHop {
            out_port: port,
            src_mac: MacAddr([0, 0, 0, 0, 0, 1]),
            dst_mac: MacAddr([0, 0, 0, 0, 0, 2]),
        }
    }

    #[test]
    fn test_longest_prefix_route() {
        let router = HybridRouter::new().unwrap();
        router.add_route_v4([10, 0, 0, 0], 8, hop(1)).unwrap();
        router.add_route_v4([10, 1, 0, 0], 16, hop(2)).unwrap();

        assert_eq!(router.lookup_v4([10, 1, 2, 3]).unwrap().out_port, 2);
        assert_eq!(router.lookup_v4([10, 200, 2, 3]).unwrap().out_port, 1);
        assert!(router.lookup_v4([172, 16, 0, 1]).is_none());
    }

    #[test]
    fn test_route_removal() {
        let router = HybridRouter::new().unwrap();
        router.add_route_v4([10, 1, 0, 0], 16, hop(2)).unwrap();
        router.del_route_v4([10, 1, 0, 0], 16);
        assert!(router.lookup_v4([10, 1, 2, 3]).is_none());
    }

    #[test]
    fn test_v6_route() {
        let router = HybridRouter::new().unwrap();
        let mut prefix = [0u8; 16];
        prefix[0] = 0x20;
        prefix[1] = 0x01;
        router.add_route_v6(prefix, 32, hop(4)).unwrap();
        let mut addr = prefix;
        addr[15] = 1;
        assert_eq!(router.lookup_v6(addr).unwrap().out_port, 4);
    }
}
