//! Per-packet pipeline
//!
//! Classify, consult the flow cache, walk the tables, execute instructions
//! and finally run the accumulated action set. A packet that nothing
//! transmits is dropped (table-miss default).

use std::sync::Arc;

use ofsw_common::Timestamp;
use ofsw_flowdb::{ActionSet, Flow, MeterPolicer, SwitchTables};
use ofsw_packet::{Packet, PKT_FLAG_CACHED_FLOW};

use crate::actions::{self, Exec};
use crate::cache::FlowCache;
use crate::fields::packet_matches;
use crate::io::{EventQueue, PacketIo};
use crate::port::PortMap;
use crate::rib::HybridRouter;

/// Hard bound on the table walk, one step per possible table.
pub const PIPELINE_MAX: usize = 254;

/// Everything a packet worker needs for one critical section. All
/// references are held under the bridge's read lock.
pub struct PipelineEnv<'a> {
    /// Flow, group and meter tables.
    pub tables: &'a SwitchTables,
    /// Bridge ports.
    pub ports: &'a PortMap,
    /// Packet I/O back-end.
    pub io: &'a dyn PacketIo,
    /// Event queues toward the controller channel.
    pub events: &'a dyn EventQueue,
    /// Meter coloring oracle.
    pub policer: &'a dyn MeterPolicer,
    /// The bridge flow cache.
    pub cache: &'a FlowCache,
    /// Owning datapath id.
    pub dpid: u64,
    /// Time of this critical section.
    pub now: Timestamp,
    /// Bytes of punted packets to include on table miss paths.
    pub miss_send_len: u16,
    /// OFPPC_NO_PACKET_IN on the controller port.
    pub controller_no_packet_in: bool,
    /// Non-OpenFlow forwarding fallback for OFPP_NORMAL.
    pub hybrid: Option<&'a HybridRouter>,
}

/// Per-packet execution state.
pub struct PacketContext {
    /// The packet under processing.
    pub pkt: Packet,
    /// Current table of the walk.
    pub table_id: u8,
    /// Accumulated write-actions.
    pub action_set: ActionSet,
    /// Flows matched so far, in walk order.
    pub matched: Vec<Arc<Flow>>,
    /// Flow currently executing.
    pub flow: Option<Arc<Flow>>,
}

impl PacketContext {
    /// Fresh state starting at table 0.
    pub fn new(pkt: Packet) -> Self {
        PacketContext {
            pkt,
            table_id: 0,
            action_set: ActionSet::new(),
            matched: Vec::new(),
            flow: None,
        }
    }
}

/// Instruction-set execution outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstExec {
    Ok,
    NextTable,
    Stop,
    NoMoreAction,
}

/// Execute one flow's instructions in the fixed order METER,
/// APPLY_ACTIONS, CLEAR_ACTIONS, WRITE_ACTIONS, WRITE_METADATA,
/// GOTO_TABLE. With `cached` the goto is a no-op because the walk is
/// already linearized in the cache entry.
fn execute_instruction_set(
    env: &PipelineEnv<'_>,
    ctx: &mut PacketContext,
    flow: &Arc<Flow>,
    cached: bool,
) -> InstExec {
    let instructions = &flow.instructions;

    if let Some(meter_id) = instructions.meter {
        if actions::apply_meter(env, &mut ctx.pkt, meter_id) {
            ctx.action_set.clear();
            return InstExec::Stop;
        }
    }
    // A meter drop does not count as a hit on the flow.
    flow.hit(ctx.pkt.len() as u64, env.now);
    if let Some(apply) = &instructions.apply_actions {
        match actions::execute_action_list(env, ctx, apply) {
            Exec::Ok => {}
            Exec::NoMoreAction => return InstExec::NoMoreAction,
            Exec::Stop => return InstExec::Stop,
        }
    }
    if instructions.clear_actions {
        ctx.action_set.clear();
    }
    if let Some(write) = &instructions.write_actions {
        ctx.action_set.merge(write);
    }
    if let Some((metadata, mask)) = instructions.write_metadata {
        let current = ctx.pkt.oob.metadata.to_host();
        let updated = (current & !mask) | (metadata & mask);
        ctx.pkt.oob.metadata = ofsw_common::Be64::from_host(updated);
    }
    if let Some(table_id) = instructions.goto_table {
        if !cached {
            ctx.table_id = table_id;
            return InstExec::NextTable;
        }
    }
    InstExec::Ok
}

/// Replay a cached walk: bump counters and run each flow's instructions
/// with goto linearized away.
fn cached_action(env: &PipelineEnv<'_>, ctx: &mut PacketContext) -> Option<Exec> {
    let hash = ctx.pkt.hash();
    let entry = env.cache.lookup(hash)?;
    ctx.pkt.flags |= PKT_FLAG_CACHED_FLOW;

    for flow in &entry.flows {
        ctx.table_id = flow.table_id;
        if let Some(table) = env.tables.flowdb.table(flow.table_id) {
            table.lookup_count.inc();
            if flow.priority > 0 {
                table.matched_count.inc();
            }
        }
        ctx.flow = Some(flow.clone());
        match execute_instruction_set(env, ctx, flow, true) {
            InstExec::Ok | InstExec::NextTable => {}
            InstExec::Stop => return Some(Exec::Stop),
            InstExec::NoMoreAction => return Some(Exec::NoMoreAction),
        }
    }
    Some(Exec::Ok)
}

/// The table walk for a packet the cache does not know.
fn table_walk(env: &PipelineEnv<'_>, ctx: &mut PacketContext) -> Exec {
    loop {
        let table = match env.tables.flowdb.table(ctx.table_id) {
            Some(table) => table,
            None => return Exec::Stop,
        };
        table.lookup_count.inc();

        let flow = table
            .flows()
            .iter()
            .find(|f| packet_matches(&ctx.pkt, &f.match_list))
            .cloned();

        let flow = match flow {
            Some(flow) if ctx.matched.len() < PIPELINE_MAX => flow,
            // Table miss: the default behavior is drop (5.4 Table-miss).
            _ => return Exec::Stop,
        };

        if flow.priority > 0 {
            table.matched_count.inc();
        }
        ctx.matched.push(flow.clone());
        ctx.flow = Some(flow.clone());

        match execute_instruction_set(env, ctx, &flow, false) {
            InstExec::NextTable => continue,
            InstExec::Ok => return Exec::Ok,
            InstExec::Stop => return Exec::Stop,
            InstExec::NoMoreAction => return Exec::NoMoreAction,
        }
    }
}

/// Execute the accumulated action set in write-set priority order.
fn do_action_set(env: &PipelineEnv<'_>, ctx: &mut PacketContext) -> Exec {
    if !ctx.action_set.has_actions() {
        return Exec::Ok;
    }
    let set = std::mem::take(&mut ctx.action_set);
    actions::execute_merged_set(env, ctx, &set)
}

/// Match and act on one classified packet. Returns `NoMoreAction` when an
/// output consumed the packet; anything else means the packet is dropped.
pub fn match_and_action(env: &PipelineEnv<'_>, ctx: &mut PacketContext) -> Exec {
    let mut rv = match cached_action(env, ctx) {
        Some(rv) => rv,
        None => table_walk(env, ctx),
    };
    if rv == Exec::Ok {
        rv = do_action_set(env, ctx);
    }
    rv
}

/// Classify a received frame and run it through the pipeline.
pub fn process_frame(
    env: &PipelineEnv<'_>,
    frame: &[u8],
    in_port: u32,
    ifindex: u64,
) -> Exec {
    let pkt = Packet::new(frame, in_port, ifindex);
    let mut ctx = PacketContext::new(pkt);
    match_and_action(env, &mut ctx)
}
