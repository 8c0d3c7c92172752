//! Bridge: one OpenFlow switch instance
//!
//! A bridge owns its flow/group/meter tables, ports, flow cache and the
//! lock pair guarding them. Control transactions go through
//! [`Bridge::with_write`], which wraps the update barrier around the data
//! write lock and invalidates the flow cache on the way out; packet
//! workers use [`Bridge::with_read`].

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use arc_swap::ArcSwap;
use ofsw_common::openflow::{
    OFPC_FLOW_STATS, OFPC_GROUP_STATS, OFPC_PORT_STATS, OFPC_TABLE_STATS,
    OPENFLOW_VERSION_1_3, OPENFLOW_VERSION_1_4,
};
use ofsw_common::{SwitchError, SwitchResult};
use ofsw_flowdb::SwitchTables;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::FlowCache;
use crate::lock::FlowLock;
use crate::port::PortMap;

/// Behavior when the controller connection is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailMode {
    /// Keep the installed flows and stop punting.
    Secure,
    /// Fall back to non-OpenFlow forwarding.
    Standalone,
}

/// Creation parameters for a bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeInfo {
    /// Datapath id advertised to controllers.
    pub dpid: u64,
    /// Fail mode.
    pub fail_mode: FailMode,
}

/// OFPT_FEATURES_REPLY content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchFeatures {
    /// Packets the switch can buffer for packet-in.
    pub n_buffers: u32,
    /// Number of tables.
    pub n_tables: u8,
    /// Auxiliary connection id.
    pub auxiliary_id: u8,
    /// OFPC_* capability bits.
    pub capabilities: u32,
}

impl Default for SwitchFeatures {
    fn default() -> Self {
        SwitchFeatures {
            n_buffers: 65535,
            n_tables: 255,
            auxiliary_id: 0,
            capabilities: OFPC_FLOW_STATS
                | OFPC_TABLE_STATS
                | OFPC_PORT_STATS
                | OFPC_GROUP_STATS,
        }
    }
}

/// OFPT_SET_CONFIG content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// OFPC_FRAG_* handling flags.
    pub flags: u16,
    /// Bytes of a punted packet to send on miss paths.
    pub miss_send_len: u16,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        SwitchConfig {
            flags: 0,
            miss_send_len: 128,
        }
    }
}

/// One OpenFlow switch instance.
pub struct Bridge {
    /// Bridge name, unique in the process.
    pub name: String,
    /// Datapath id, unique in the process.
    pub dpid: u64,
    fail_mode: AtomicU8,
    version: AtomicU8,
    version_bitmap: AtomicU32,
    /// Advertised features.
    pub features: SwitchFeatures,
    config: ArcSwap<SwitchConfig>,
    lock: FlowLock,
    tables: RwLock<SwitchTables>,
    /// Ports by OpenFlow port number.
    pub ports: PortMap,
    /// The per-bridge flow cache.
    pub cache: FlowCache,
    /// Config bits of the controller reserved port (NO_PACKET_IN).
    pub controller_port_config: AtomicU32,
    running: AtomicBool,
}

impl Bridge {
    /// A stopped bridge with default features, speaking 1.3.
    pub fn new(name: &str, info: &BridgeInfo) -> Self {
        Bridge {
            name: name.to_string(),
            dpid: info.dpid,
            fail_mode: AtomicU8::new(info.fail_mode as u8),
            version: AtomicU8::new(OPENFLOW_VERSION_1_3),
            version_bitmap: AtomicU32::new(1 << OPENFLOW_VERSION_1_3),
            features: SwitchFeatures::default(),
            config: ArcSwap::from_pointee(SwitchConfig::default()),
            lock: FlowLock::new(),
            tables: RwLock::new(SwitchTables::new()),
            ports: PortMap::default(),
            cache: FlowCache::new(),
            controller_port_config: AtomicU32::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Fail mode.
    pub fn fail_mode(&self) -> FailMode {
        if self.fail_mode.load(Ordering::Acquire) == FailMode::Secure as u8 {
            FailMode::Secure
        } else {
            FailMode::Standalone
        }
    }

    /// Change the fail mode.
    pub fn set_fail_mode(&self, mode: FailMode) {
        self.fail_mode.store(mode as u8, Ordering::Release);
    }

    /// Primary protocol version.
    pub fn version(&self) -> u8 {
        self.version.load(Ordering::Acquire)
    }

    /// Set the primary protocol version (1.3 or 1.4 only).
    pub fn set_version(&self, version: u8) -> SwitchResult<()> {
        if version != OPENFLOW_VERSION_1_3 && version != OPENFLOW_VERSION_1_4 {
            return Err(SwitchError::InvalidArgs(format!(
                "unsupported version {version}"
            )));
        }
        self.version.store(version, Ordering::Release);
        Ok(())
    }

    /// Supported version bitmap.
    pub fn version_bitmap(&self) -> u32 {
        self.version_bitmap.load(Ordering::Acquire)
    }

    /// Mark a version supported.
    pub fn version_bitmap_set(&self, version: u8) {
        self.version_bitmap
            .fetch_or(1 << version, Ordering::AcqRel);
    }

    /// Current switch config snapshot.
    pub fn config(&self) -> Arc<SwitchConfig> {
        self.config.load_full()
    }

    /// Replace the switch config.
    pub fn set_config(&self, config: SwitchConfig) {
        self.config.store(Arc::new(config));
    }

    /// `true` after start and before stop.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start forwarding.
    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// Stop forwarding.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Run a packet worker critical section under the read lock.
    pub fn with_read<R>(&self, f: impl FnOnce(&SwitchTables) -> R) -> R {
        let guard = self.tables.read();
        f(&guard)
    }

    /// Run a control transaction: update barrier around the data write
    /// lock, flow cache invalidated after the mutation applies.
    pub fn with_write<R>(&self, f: impl FnOnce(&mut SwitchTables) -> R) -> R {
        let barrier = self.lock.begin_update();
        let mut guard = self.tables.write();
        let result = f(&mut guard);
        drop(guard);
        drop(barrier);
        self.cache.invalidate();
        result
    }

    /// Quiescent-state barrier for packet workers between bursts.
    pub fn check_update(&self) {
        self.lock.check_update();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> Bridge {
        Bridge::new(
            "br0",
            &BridgeInfo {
                dpid: 1,
                fail_mode: FailMode::Secure,
            },
        )
    }

    #[test]
    fn test_defaults() {
        let b = bridge();
        assert_eq!(b.version(), OPENFLOW_VERSION_1_3);
        assert_ne!(b.version_bitmap() & (1 << OPENFLOW_VERSION_1_3), 0);
        assert_eq!(b.config().miss_send_len, 128);
        assert!(!b.is_running());
        assert_ne!(b.features.capabilities & OFPC_FLOW_STATS, 0);
    }

    #[test]
    fn test_version_validation() {
        let b = bridge();
        assert!(b.set_version(OPENFLOW_VERSION_1_4).is_ok());
        assert!(b.set_version(3).is_err());
        assert_eq!(b.version(), OPENFLOW_VERSION_1_4);
    }

    #[test]
    fn test_write_invalidates_cache() {
        let b = bridge();
        let before = b.cache.generation();
        b.with_write(|_tables| {});
        assert_eq!(b.cache.generation(), before + 1);
    }

    #[test]
    fn test_fail_mode_roundtrip() {
        let b = bridge();
        assert_eq!(b.fail_mode(), FailMode::Secure);
        b.set_fail_mode(FailMode::Standalone);
        assert_eq!(b.fail_mode(), FailMode::Standalone);
    }
}
