//! OpenFlow ports
//!
//! A port binds an OpenFlow port number to a backing interface. The port
//! map is shared between packet workers and the control plane, so config
//! and state bits are atomics.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use ofsw_common::openflow::{OFPPC_PORT_DOWN, OFPPS_LINK_DOWN, OFPPS_LIVE};
use ofsw_common::MacAddr;
use serde::{Deserialize, Serialize};

/// Port counters.
#[derive(Debug, Default)]
pub struct PortCounters {
    /// Frames received.
    pub rx_packets: AtomicU64,
    /// Frames transmitted.
    pub tx_packets: AtomicU64,
    /// Bytes received.
    pub rx_bytes: AtomicU64,
    /// Bytes transmitted.
    pub tx_bytes: AtomicU64,
    /// Packets dropped at ingress.
    pub rx_dropped: AtomicU64,
    /// Packets dropped at egress.
    pub tx_dropped: AtomicU64,
}

/// Port stats multipart entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortStats {
    /// Port number.
    pub port_no: u32,
    /// Frames received.
    pub rx_packets: u64,
    /// Frames transmitted.
    pub tx_packets: u64,
    /// Bytes received.
    pub rx_bytes: u64,
    /// Bytes transmitted.
    pub tx_bytes: u64,
    /// Packets dropped at ingress.
    pub rx_dropped: u64,
    /// Packets dropped at egress.
    pub tx_dropped: u64,
}

/// One OpenFlow port.
#[derive(Debug)]
pub struct Port {
    /// OpenFlow port number.
    pub port_no: u32,
    /// Port name (unique in the process).
    pub name: String,
    /// Backing interface, when attached.
    pub interface: Option<String>,
    /// Hardware address reported by the interface.
    pub hw_addr: MacAddr,
    /// OFPPC_* bits.
    config: AtomicU32,
    /// OFPPS_* bits.
    state: AtomicU32,
    /// Interface index used as the packet hash seed.
    pub ifindex: u64,
    /// Counters.
    pub counters: PortCounters,
}

impl Port {
    /// A detached port with no interface.
    pub fn new(port_no: u32, name: &str) -> Self {
        Port {
            port_no,
            name: name.to_string(),
            interface: None,
            hw_addr: MacAddr::ZERO,
            config: AtomicU32::new(0),
            state: AtomicU32::new(OFPPS_LINK_DOWN),
            ifindex: port_no as u64,
            counters: PortCounters::default(),
        }
    }

    /// OFPPC_* bits.
    pub fn config(&self) -> u32 {
        self.config.load(Ordering::Acquire)
    }

    /// Replace the config bits.
    pub fn set_config(&self, config: u32) {
        self.config.store(config, Ordering::Release);
    }

    /// OFPPS_* bits.
    pub fn state(&self) -> u32 {
        self.state.load(Ordering::Acquire)
    }

    /// Record the link coming up or down and refresh OFPPS_LIVE.
    pub fn set_link(&self, up: bool) {
        let mut state = self.state.load(Ordering::Acquire);
        if up {
            state &= !OFPPS_LINK_DOWN;
        } else {
            state |= OFPPS_LINK_DOWN;
        }
        if up && self.config.load(Ordering::Acquire) & OFPPC_PORT_DOWN == 0 {
            state |= OFPPS_LIVE;
        } else {
            state &= !OFPPS_LIVE;
        }
        self.state.store(state, Ordering::Release);
    }

    /// Liveness for fast-failover purposes: administratively up and link up.
    pub fn is_live(&self) -> bool {
        self.config() & OFPPC_PORT_DOWN == 0 && self.state() & OFPPS_LINK_DOWN == 0
    }

    /// `true` when the port may forward traffic.
    pub fn can_forward(&self) -> bool {
        use ofsw_common::openflow::OFPPC_NO_FWD;
        self.config() & (OFPPC_PORT_DOWN | OFPPC_NO_FWD) == 0 && self.interface.is_some()
    }

    /// Stats snapshot.
    pub fn stats(&self) -> PortStats {
        PortStats {
            port_no: self.port_no,
            rx_packets: self.counters.rx_packets.load(Ordering::Relaxed),
            tx_packets: self.counters.tx_packets.load(Ordering::Relaxed),
            rx_bytes: self.counters.rx_bytes.load(Ordering::Relaxed),
            tx_bytes: self.counters.tx_bytes.load(Ordering::Relaxed),
            rx_dropped: self.counters.rx_dropped.load(Ordering::Relaxed),
            tx_dropped: self.counters.tx_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Port number to port map of one bridge.
pub type PortMap = DashMap<u32, Arc<Port>>;

/// Port-existence view over a bridge's port map, for flow-mod validation.
pub struct PortMapLookup<'a>(pub &'a PortMap);

impl ofsw_flowdb::PortLookup for PortMapLookup<'_> {
    fn port_exists(&self, port_no: u32) -> bool {
        self.0.contains_key(&port_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness() {
        let port = Port::new(1, "p1");
        assert!(!port.is_live());
        port.set_link(true);
        assert!(port.is_live());
        assert_ne!(port.state() & OFPPS_LIVE, 0);

        port.set_config(OFPPC_PORT_DOWN);
        port.set_link(true);
        assert!(!port.is_live());
    }

    #[test]
    fn test_can_forward_needs_interface() {
        let mut port = Port::new(2, "p2");
        port.set_link(true);
        assert!(!port.can_forward());
        port.interface = Some("eth0".into());
        assert!(port.can_forward());
    }

    #[test]
    fn test_stats_snapshot() {
        let port = Port::new(3, "p3");
        port.counters.rx_packets.fetch_add(2, Ordering::Relaxed);
        port.counters.rx_bytes.fetch_add(128, Ordering::Relaxed);
        let stats = port.stats();
        assert_eq!(stats.rx_packets, 2);
        assert_eq!(stats.rx_bytes, 128);
        assert_eq!(stats.port_no, 3);
    }
}
