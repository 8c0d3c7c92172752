//! Datapath: the process-wide composition root
//!
//! Owns the bridge registries (by name and by dpid), the detached port
//! registry, and the capability handles toward the surrounding process.
//! External control requests enter here, are routed by dpid, applied
//! under the owning bridge's write barrier, and produce controller events
//! on the way out.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use ofsw_common::openflow::{
    FlowModCommand, GroupModCommand, MeterModCommand, PortStatusReason, OFPPC_NO_RECV,
    OFPPC_PORT_DOWN,
};
use ofsw_common::{SwitchError, SwitchResult};
use ofsw_flowdb::{
    AggregateStats, Bucket, FlowMod, FlowStats, FlowStatsRequest, GroupDesc, GroupFeatures,
    GroupMod, GroupStats, Instruction, Match, MeterBand, MeterConfig, MeterFeatures, MeterMod,
    MeterPolicer, MeterStats, TableStats,
};

use crate::actions::Exec;
use crate::bridge::{Bridge, BridgeInfo};
use crate::io::{
    Event, EventQueue, MonotonicClock, PacketIo, PortStatus, EVENT_PUT_TIMEOUT,
};
use crate::pipeline::{self, PipelineEnv};
use crate::port::{Port, PortMapLookup, PortStats};
use crate::rib::HybridRouter;

/// Frames pulled per interface per poll.
pub const RX_BURST_SIZE: usize = 32;

#[derive(Debug, Clone, Default)]
struct PortEntry {
    interface: Option<String>,
    attached: Option<(String, u32)>,
}

/// The process-wide datapath.
pub struct Datapath {
    bridges: DashMap<String, Arc<Bridge>>,
    dpid_map: DashMap<u64, Arc<Bridge>>,
    port_registry: DashMap<String, PortEntry>,
    io: Arc<dyn PacketIo>,
    events: Arc<dyn EventQueue>,
    clock: Arc<dyn MonotonicClock>,
    policer: Arc<dyn MeterPolicer>,
    hybrid: Option<Arc<HybridRouter>>,
}

impl Datapath {
    /// Wire the datapath to its collaborators.
    pub fn new(
        io: Arc<dyn PacketIo>,
        events: Arc<dyn EventQueue>,
        clock: Arc<dyn MonotonicClock>,
        policer: Arc<dyn MeterPolicer>,
    ) -> Self {
        Datapath {
            bridges: DashMap::new(),
            dpid_map: DashMap::new(),
            port_registry: DashMap::new(),
            io,
            events,
            clock,
            policer,
            hybrid: None,
        }
    }

    /// Attach the non-OpenFlow forwarding fallback used by OFPP_NORMAL.
    pub fn set_hybrid(&mut self, hybrid: Arc<HybridRouter>) {
        self.hybrid = Some(hybrid);
    }

    // -- bridge management --------------------------------------------------

    /// Create a bridge; both the name and the dpid must be unused.
    pub fn bridge_create(&self, name: &str, info: &BridgeInfo) -> SwitchResult<()> {
        if name.is_empty() {
            return Err(SwitchError::InvalidArgs("empty bridge name".into()));
        }
        if self.bridges.contains_key(name) {
            return Err(SwitchError::AlreadyExists(name.to_string()));
        }
        if self.dpid_map.contains_key(&info.dpid) {
            return Err(SwitchError::AlreadyExists(format!("dpid {:#x}", info.dpid)));
        }
        let bridge = Arc::new(Bridge::new(name, info));
        self.bridges.insert(name.to_string(), bridge.clone());
        self.dpid_map.insert(info.dpid, bridge);
        Ok(())
    }

    /// Destroy a bridge. Every port must be detached first.
    pub fn bridge_destroy(&self, name: &str) -> SwitchResult<()> {
        let bridge = self.bridge(name)?;
        if !bridge.ports.is_empty() {
            return Err(SwitchError::InvalidArgs(format!(
                "bridge {name} still has ports"
            )));
        }
        bridge.stop();
        self.dpid_map.remove(&bridge.dpid);
        self.bridges.remove(name);
        Ok(())
    }

    /// Start forwarding on a bridge.
    pub fn bridge_start(&self, name: &str) -> SwitchResult<()> {
        self.bridge(name)?.start();
        Ok(())
    }

    /// Stop forwarding on a bridge.
    pub fn bridge_stop(&self, name: &str) -> SwitchResult<()> {
        self.bridge(name)?.stop();
        Ok(())
    }

    /// Bridge by name.
    pub fn bridge(&self, name: &str) -> SwitchResult<Arc<Bridge>> {
        self.bridges
            .get(name)
            .map(|b| b.value().clone())
            .ok_or_else(|| SwitchError::NotFound(format!("bridge {name}")))
    }

    /// Bridge by datapath id.
    pub fn bridge_by_dpid(&self, dpid: u64) -> SwitchResult<Arc<Bridge>> {
        self.dpid_map
            .get(&dpid)
            .map(|b| b.value().clone())
            .ok_or_else(|| SwitchError::NotFound(format!("dpid {dpid:#x}")))
    }

    // -- port management ----------------------------------------------------

    /// Register a detached port name.
    pub fn port_create(&self, name: &str) -> SwitchResult<()> {
        if name.is_empty() {
            return Err(SwitchError::InvalidArgs("empty port name".into()));
        }
        if self.port_registry.contains_key(name) {
            return Err(SwitchError::AlreadyExists(name.to_string()));
        }
        self.port_registry
            .insert(name.to_string(), PortEntry::default());
        Ok(())
    }

    /// Drop a detached port name.
    pub fn port_destroy(&self, name: &str) -> SwitchResult<()> {
        let entry = self
            .port_registry
            .get(name)
            .ok_or_else(|| SwitchError::NotFound(format!("port {name}")))?;
        if entry.attached.is_some() {
            return Err(SwitchError::InvalidArgs(format!(
                "port {name} is attached to a bridge"
            )));
        }
        drop(entry);
        self.port_registry.remove(name);
        Ok(())
    }

    /// Bind a port name to a backing interface.
    pub fn port_interface_set(&self, name: &str, interface: &str) -> SwitchResult<()> {
        let mut entry = self
            .port_registry
            .get_mut(name)
            .ok_or_else(|| SwitchError::NotFound(format!("port {name}")))?;
        entry.interface = Some(interface.to_string());
        let attached = entry.attached.clone();
        drop(entry);
        if let Some((bridge_name, port_no)) = attached {
            self.refresh_attached_port(&bridge_name, name, port_no)?;
        }
        Ok(())
    }

    /// Unbind a port name from its interface.
    pub fn port_interface_unset(&self, name: &str) -> SwitchResult<()> {
        let mut entry = self
            .port_registry
            .get_mut(name)
            .ok_or_else(|| SwitchError::NotFound(format!("port {name}")))?;
        entry.interface = None;
        let attached = entry.attached.clone();
        drop(entry);
        if let Some((bridge_name, port_no)) = attached {
            self.refresh_attached_port(&bridge_name, name, port_no)?;
        }
        Ok(())
    }

    fn build_port(&self, name: &str, port_no: u32, interface: Option<&str>) -> Arc<Port> {
        let mut port = Port::new(port_no, name);
        if let Some(interface) = interface {
            port.interface = Some(interface.to_string());
            port.hw_addr = self.io.hw_addr(interface);
            port.set_link(self.io.link_up(interface));
        }
        Arc::new(port)
    }

    fn refresh_attached_port(
        &self,
        bridge_name: &str,
        port_name: &str,
        port_no: u32,
    ) -> SwitchResult<()> {
        let bridge = self.bridge(bridge_name)?;
        let interface = self
            .port_registry
            .get(port_name)
            .and_then(|e| e.interface.clone());
        let port = self.build_port(port_name, port_no, interface.as_deref());
        bridge.ports.insert(port_no, port.clone());
        bridge.cache.invalidate();
        self.send_port_status(&bridge, &port, PortStatusReason::Modify);
        Ok(())
    }

    /// Attach a port to a bridge under a port number.
    pub fn bridge_port_set(
        &self,
        bridge_name: &str,
        port_name: &str,
        port_no: u32,
    ) -> SwitchResult<()> {
        let bridge = self.bridge(bridge_name)?;
        let mut entry = self
            .port_registry
            .get_mut(port_name)
            .ok_or_else(|| SwitchError::NotFound(format!("port {port_name}")))?;
        if entry.attached.is_some() {
            return Err(SwitchError::AlreadyExists(format!(
                "port {port_name} already attached"
            )));
        }
        if bridge.ports.contains_key(&port_no) {
            return Err(SwitchError::AlreadyExists(format!(
                "port number {port_no} on bridge {bridge_name}"
            )));
        }
        entry.attached = Some((bridge_name.to_string(), port_no));
        let interface = entry.interface.clone();
        drop(entry);

        let port = self.build_port(port_name, port_no, interface.as_deref());
        bridge.ports.insert(port_no, port.clone());
        bridge.cache.invalidate();
        self.send_port_status(&bridge, &port, PortStatusReason::Add);
        Ok(())
    }

    /// Detach a port from its bridge.
    pub fn bridge_port_unset(&self, bridge_name: &str, port_name: &str) -> SwitchResult<()> {
        let bridge = self.bridge(bridge_name)?;
        let mut entry = self
            .port_registry
            .get_mut(port_name)
            .ok_or_else(|| SwitchError::NotFound(format!("port {port_name}")))?;
        let (attached_bridge, port_no) = entry
            .attached
            .clone()
            .ok_or_else(|| SwitchError::InvalidArgs(format!("port {port_name} not attached")))?;
        if attached_bridge != bridge_name {
            return Err(SwitchError::InvalidArgs(format!(
                "port {port_name} attached to {attached_bridge}"
            )));
        }
        entry.attached = None;
        drop(entry);

        if let Some((_, port)) = bridge.ports.remove(&port_no) {
            bridge.cache.invalidate();
            self.send_port_status(&bridge, &port, PortStatusReason::Delete);
        }
        Ok(())
    }

    /// Record a link transition reported by the I/O layer.
    pub fn port_link_update(&self, bridge_name: &str, port_no: u32, up: bool) -> SwitchResult<()> {
        let bridge = self.bridge(bridge_name)?;
        let port = bridge
            .ports
            .get(&port_no)
            .map(|p| p.value().clone())
            .ok_or_else(|| SwitchError::NotFound(format!("port {port_no}")))?;
        port.set_link(up);
        bridge.cache.invalidate();
        self.send_port_status(&bridge, &port, PortStatusReason::Modify);
        Ok(())
    }

    fn send_port_status(&self, bridge: &Bridge, port: &Port, reason: PortStatusReason) {
        let status = PortStatus {
            reason,
            port_no: port.port_no,
            name: port.name.clone(),
            config: port.config(),
            state: port.state(),
        };
        let _ = self
            .events
            .put_event(bridge.dpid, Event::PortStatus(status), EVENT_PUT_TIMEOUT);
    }

    // -- flow/group/meter mod -----------------------------------------------

    /// OFPT_FLOW_MOD routed by dpid.
    pub fn flow_mod(
        &self,
        dpid: u64,
        flow_mod: &FlowMod,
        match_list: Vec<Match>,
        instructions: Vec<Instruction>,
    ) -> SwitchResult<()> {
        let bridge = self.bridge_by_dpid(dpid)?;
        let now = self.clock.now();
        let removed = bridge.with_write(|tables| match flow_mod.command {
            FlowModCommand::Add => {
                tables
                    .flow_add(
                        &PortMapLookup(&bridge.ports),
                        flow_mod,
                        match_list,
                        instructions,
                        now,
                    )
                    .map(|_| Vec::new())
            }
            FlowModCommand::Modify | FlowModCommand::ModifyStrict => {
                tables
                    .flow_modify(
                        &PortMapLookup(&bridge.ports),
                        flow_mod,
                        match_list,
                        instructions,
                        now,
                    )
                    .map(|_| Vec::new())
            }
            FlowModCommand::Delete | FlowModCommand::DeleteStrict => {
                tables.flow_delete(flow_mod, match_list, now)
            }
        })?;
        for record in removed {
            let _ = self
                .events
                .put_event(dpid, Event::FlowRemoved(record), EVENT_PUT_TIMEOUT);
        }
        Ok(())
    }

    /// OFPT_GROUP_MOD routed by dpid.
    pub fn group_mod(
        &self,
        dpid: u64,
        group_mod: &GroupMod,
        buckets: Vec<Bucket>,
    ) -> SwitchResult<()> {
        let bridge = self.bridge_by_dpid(dpid)?;
        let now = self.clock.now();
        let removed = bridge.with_write(|tables| match group_mod.command {
            GroupModCommand::Add => tables.group_add(group_mod, buckets, now).map(|_| Vec::new()),
            GroupModCommand::Modify => tables.group_modify(group_mod, buckets).map(|_| Vec::new()),
            GroupModCommand::Delete => Ok(tables.group_delete(group_mod.group_id, now)),
        })?;
        for record in removed {
            let _ = self
                .events
                .put_event(dpid, Event::FlowRemoved(record), EVENT_PUT_TIMEOUT);
        }
        Ok(())
    }

    /// OFPT_METER_MOD routed by dpid.
    pub fn meter_mod(
        &self,
        dpid: u64,
        meter_mod: &MeterMod,
        bands: Vec<MeterBand>,
    ) -> SwitchResult<()> {
        let bridge = self.bridge_by_dpid(dpid)?;
        let now = self.clock.now();
        bridge.with_write(|tables| match meter_mod.command {
            MeterModCommand::Add => tables.meter_add(meter_mod, bands, now),
            MeterModCommand::Modify => tables.meter_modify(meter_mod, bands),
            MeterModCommand::Delete => tables.meter_delete(meter_mod.meter_id),
        })
    }

    /// Remove every flow whose idle or hard timeout has elapsed, emitting
    /// flow-removed events. Runs on the control plane.
    pub fn expire_flow_timers(&self) -> usize {
        let now = self.clock.now();
        let mut removed_total = 0;
        for bridge in self.bridges.iter() {
            let bridge = bridge.value();
            let records = bridge.with_write(|tables| {
                let mut records = Vec::new();
                for (flow_id, table_id, reason) in tables.expired_flows(now) {
                    if let Some(record) = tables.remove_flow_by_id(flow_id, table_id, reason, now)
                    {
                        records.push(record);
                    }
                    removed_total += 1;
                }
                records
            });
            for record in records {
                let _ = self.events.put_event(
                    bridge.dpid,
                    Event::FlowRemoved(record),
                    EVENT_PUT_TIMEOUT,
                );
            }
        }
        removed_total
    }

    // -- multipart ----------------------------------------------------------

    /// Flow stats multipart.
    pub fn flow_stats(
        &self,
        dpid: u64,
        request: &FlowStatsRequest,
        match_list: &[Match],
    ) -> SwitchResult<Vec<FlowStats>> {
        let bridge = self.bridge_by_dpid(dpid)?;
        let now = self.clock.now();
        bridge.with_read(|tables| tables.flow_stats(request, match_list, now))
    }

    /// Aggregate stats multipart.
    pub fn aggregate_stats(
        &self,
        dpid: u64,
        request: &FlowStatsRequest,
        match_list: &[Match],
    ) -> SwitchResult<AggregateStats> {
        let bridge = self.bridge_by_dpid(dpid)?;
        bridge.with_read(|tables| tables.aggregate_stats(request, match_list))
    }

    /// Table stats multipart.
    pub fn table_stats(&self, dpid: u64) -> SwitchResult<Vec<TableStats>> {
        let bridge = self.bridge_by_dpid(dpid)?;
        Ok(bridge.with_read(|tables| tables.table_stats()))
    }

    /// Group stats multipart.
    pub fn group_stats(&self, dpid: u64, group_id: u32) -> SwitchResult<Vec<GroupStats>> {
        let bridge = self.bridge_by_dpid(dpid)?;
        let now = self.clock.now();
        Ok(bridge.with_read(|tables| tables.groups.stats(group_id, now)))
    }

    /// Group description multipart.
    pub fn group_descs(&self, dpid: u64) -> SwitchResult<Vec<GroupDesc>> {
        let bridge = self.bridge_by_dpid(dpid)?;
        Ok(bridge.with_read(|tables| tables.groups.descs()))
    }

    /// Group features multipart.
    pub fn group_features(&self, dpid: u64) -> SwitchResult<GroupFeatures> {
        let bridge = self.bridge_by_dpid(dpid)?;
        Ok(bridge.with_read(|tables| tables.groups.features()))
    }

    /// Meter stats multipart.
    pub fn meter_stats(&self, dpid: u64, meter_id: u32) -> SwitchResult<Vec<MeterStats>> {
        let bridge = self.bridge_by_dpid(dpid)?;
        let now = self.clock.now();
        Ok(bridge.with_read(|tables| tables.meters.stats(meter_id, now)))
    }

    /// Meter config multipart.
    pub fn meter_configs(&self, dpid: u64, meter_id: u32) -> SwitchResult<Vec<MeterConfig>> {
        let bridge = self.bridge_by_dpid(dpid)?;
        Ok(bridge.with_read(|tables| tables.meters.configs(meter_id)))
    }

    /// Meter features multipart.
    pub fn meter_features(&self, dpid: u64) -> SwitchResult<MeterFeatures> {
        let bridge = self.bridge_by_dpid(dpid)?;
        Ok(bridge.with_read(|tables| tables.meters.features()))
    }

    /// Port stats multipart.
    pub fn port_stats(&self, dpid: u64) -> SwitchResult<Vec<PortStats>> {
        let bridge = self.bridge_by_dpid(dpid)?;
        let mut stats: Vec<PortStats> = bridge.ports.iter().map(|p| p.stats()).collect();
        stats.sort_by_key(|s| s.port_no);
        Ok(stats)
    }

    // -- packet path --------------------------------------------------------

    /// Run one received frame through a bridge's pipeline.
    pub fn process_frame(&self, dpid: u64, in_port: u32, frame: &[u8]) -> SwitchResult<Exec> {
        let bridge = self.bridge_by_dpid(dpid)?;
        if !bridge.is_running() {
            return Ok(Exec::Stop);
        }
        let port = bridge
            .ports
            .get(&in_port)
            .map(|p| p.value().clone())
            .ok_or_else(|| SwitchError::NotFound(format!("port {in_port}")))?;
        if port.config() & (OFPPC_PORT_DOWN | OFPPC_NO_RECV) != 0 {
            port.counters.rx_dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(Exec::Stop);
        }
        port.counters.rx_packets.fetch_add(1, Ordering::Relaxed);
        port.counters
            .rx_bytes
            .fetch_add(frame.len() as u64, Ordering::Relaxed);

        let now = self.clock.now();
        let config = bridge.config();
        let rv = bridge.with_read(|tables| {
            let env = PipelineEnv {
                tables,
                ports: &bridge.ports,
                io: &*self.io,
                events: &*self.events,
                policer: &*self.policer,
                cache: &bridge.cache,
                dpid: bridge.dpid,
                now,
                miss_send_len: config.miss_send_len,
                controller_no_packet_in: bridge
                    .controller_port_config
                    .load(Ordering::Acquire)
                    & ofsw_common::openflow::OFPPC_NO_PACKET_IN
                    != 0,
                hybrid: self.hybrid.as_deref(),
            };
            pipeline::process_frame(&env, frame, in_port, port.ifindex)
        });
        Ok(rv)
    }

    /// Poll every attached interface of a bridge for one burst and run the
    /// frames through the pipeline. Returns frames processed.
    pub fn poll_bridge(&self, name: &str) -> SwitchResult<usize> {
        let bridge = self.bridge(name)?;
        if !bridge.is_running() {
            return Ok(0);
        }
        let ports: Vec<(u32, String)> = bridge
            .ports
            .iter()
            .filter_map(|p| p.interface.clone().map(|i| (p.port_no, i)))
            .collect();
        let mut processed = 0;
        for (port_no, interface) in ports {
            // Quiescent point between bursts.
            bridge.check_update();
            for frame in self.io.rx_burst(&interface, RX_BURST_SIZE) {
                let _ = self.process_frame(bridge.dpid, port_no, &frame);
                processed += 1;
            }
        }
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{ChannelEventQueue, ManualClock};
    use crate::testutil::MockIo;
    use ofsw_flowdb::NullPolicer;

    fn datapath() -> (Datapath, Arc<MockIo>, Arc<ChannelEventQueue>) {
        let io = Arc::new(MockIo::new());
        let events = Arc::new(ChannelEventQueue::new(64));
        let clock = Arc::new(ManualClock::new());
        let dp = Datapath::new(
            io.clone(),
            events.clone(),
            clock,
            Arc::new(NullPolicer),
        );
        (dp, io, events)
    }

    #[test]
    fn test_bridge_create_collisions() {
        let (dp, _, _) = datapath();
        let info = BridgeInfo {
            dpid: 1,
            fail_mode: crate::bridge::FailMode::Secure,
        };
        dp.bridge_create("br0", &info).unwrap();
        assert!(matches!(
            dp.bridge_create("br0", &BridgeInfo { dpid: 2, ..info.clone() }),
            Err(SwitchError::AlreadyExists(_))
        ));
        assert!(matches!(
            dp.bridge_create("br1", &info),
            Err(SwitchError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_bridge_destroy_requires_detached_ports() {
        let (dp, _, _) = datapath();
        let info = BridgeInfo {
            dpid: 1,
            fail_mode: crate::bridge::FailMode::Secure,
        };
        dp.bridge_create("br0", &info).unwrap();
        dp.port_create("p1").unwrap();
        dp.port_interface_set("p1", "if1").unwrap();
        dp.bridge_port_set("br0", "p1", 1).unwrap();

        assert!(dp.bridge_destroy("br0").is_err());
        dp.bridge_port_unset("br0", "p1").unwrap();
        dp.bridge_destroy("br0").unwrap();
        assert!(dp.bridge("br0").is_err());
    }

    #[test]
    fn test_port_attach_emits_status() {
        let (dp, _, events) = datapath();
        let info = BridgeInfo {
            dpid: 9,
            fail_mode: crate::bridge::FailMode::Standalone,
        };
        dp.bridge_create("br0", &info).unwrap();
        dp.port_create("p1").unwrap();
        dp.port_interface_set("p1", "if1").unwrap();
        dp.bridge_port_set("br0", "p1", 4).unwrap();

        // The interface-set on an attached port refreshed nothing yet; the
        // attach itself must have produced an Add.
        let mut saw_add = false;
        while let Some((dpid, event)) = events.pop_event() {
            if let Event::PortStatus(status) = event {
                if status.reason == PortStatusReason::Add {
                    assert_eq!(dpid, 9);
                    assert_eq!(status.port_no, 4);
                    saw_add = true;
                }
            }
        }
        assert!(saw_add);
    }

    #[test]
    fn test_unknown_dpid() {
        let (dp, _, _) = datapath();
        assert!(matches!(
            dp.flow_mod(42, &FlowMod::add(0, 1), vec![], vec![]),
            Err(SwitchError::NotFound(_))
        ));
    }
}
