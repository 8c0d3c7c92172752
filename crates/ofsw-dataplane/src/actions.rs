//! Action executors
//!
//! One executor per OFPAT_* type, dispatched from a tight match. Header
//! surgery goes through the packet buffer primitives and re-runs the
//! classifier where the layout changed; checksum work is deferred through
//! the packet's RECALC flags and finalized at transmit.

use ofsw_common::openflow::*;
use ofsw_common::{Be16, Be32, Be64};
use ofsw_flowdb::{
    Action, ActionBody, ActionSet, Bucket, Group, Match, MeterEffect, OUTPUT_COPIED_PACKET,
};
use ofsw_packet::{
    mpls_bos, mpls_lse, mpls_ttl, Packet, ETH_HDR_LEN, MPLS_HDR_LEN, PBB_HDR_LEN,
    PKT_FLAG_CACHED_FLOW, PKT_FLAG_RECALC_ICMPV6_CKSUM, PKT_FLAG_RECALC_IPV4_CKSUM,
    PKT_FLAG_RECALC_L4_CKSUM, VLAN_HDR_LEN,
};

use crate::csum::finalize;
use crate::fields::mpls_lse_at;
use crate::io::{PacketIn, PACKET_IN_PUT_TIMEOUT};
use crate::pipeline::{match_and_action, PacketContext, PipelineEnv};

/// Outcome of executing one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exec {
    /// Keep processing.
    Ok,
    /// An output consumed the packet; stop processing it.
    NoMoreAction,
    /// Invalid TTL or meter drop; abandon the packet.
    Stop,
}

/// Execute an action list in order (APPLY_ACTIONS).
pub fn execute_action_list(
    env: &PipelineEnv<'_>,
    ctx: &mut PacketContext,
    list: &[Action],
) -> Exec {
    for action in list {
        match execute_action(env, ctx, action) {
            Exec::Ok => {}
            rv => return rv,
        }
    }
    Exec::Ok
}

/// Execute a merged action set slot by slot in write-set priority order.
pub fn execute_merged_set(
    env: &PipelineEnv<'_>,
    ctx: &mut PacketContext,
    set: &ActionSet,
) -> Exec {
    for slot in set.slots() {
        match execute_action_list(env, ctx, slot) {
            Exec::Ok => {}
            rv => return rv,
        }
    }
    Exec::Ok
}

fn execute_action(env: &PipelineEnv<'_>, ctx: &mut PacketContext, action: &Action) -> Exec {
    match &action.body {
        ActionBody::Output { port, .. } => execute_output(env, ctx, *port, action),
        ActionBody::CopyTtlOut => copy_ttl_out(&mut ctx.pkt),
        ActionBody::CopyTtlIn => copy_ttl_in(&mut ctx.pkt),
        ActionBody::SetMplsTtl(ttl) => set_mpls_ttl(&mut ctx.pkt, *ttl),
        ActionBody::DecMplsTtl => {
            let rv = dec_mpls_ttl(&mut ctx.pkt);
            if rv == Exec::Stop {
                punt_invalid_ttl(env, ctx, action.cookie);
            }
            rv
        }
        ActionBody::PushVlan(tpid) => push_vlan(&mut ctx.pkt, *tpid),
        ActionBody::PopVlan => pop_vlan(&mut ctx.pkt),
        ActionBody::PushMpls(ethertype) => push_mpls(&mut ctx.pkt, *ethertype),
        ActionBody::PopMpls(ethertype) => pop_mpls(&mut ctx.pkt, *ethertype),
        ActionBody::SetQueue(queue_id) => {
            ctx.pkt.queue_id = *queue_id;
            Exec::Ok
        }
        ActionBody::Group(group_id) => execute_group(env, ctx, *group_id),
        ActionBody::SetNwTtl(ttl) => set_nw_ttl(&mut ctx.pkt, *ttl),
        ActionBody::DecNwTtl => {
            let rv = dec_nw_ttl(&mut ctx.pkt);
            if rv == Exec::Stop {
                punt_invalid_ttl(env, ctx, action.cookie);
            }
            rv
        }
        ActionBody::SetField(m) => set_field(&mut ctx.pkt, m),
        ActionBody::PushPbb(ethertype) => push_pbb(&mut ctx.pkt, *ethertype),
        ActionBody::PopPbb => pop_pbb(&mut ctx.pkt),
        ActionBody::Encap(packet_type) => encap(&mut ctx.pkt, *packet_type),
        ActionBody::Decap {
            cur_pkt_type,
            new_pkt_type,
        } => decap(&mut ctx.pkt, *cur_pkt_type, *new_pkt_type),
        ActionBody::Experimenter(_) => Exec::Ok,
    }
}

// ---------------------------------------------------------------------------
// Output and transmission
// ---------------------------------------------------------------------------

fn register_cache(env: &PipelineEnv<'_>, ctx: &PacketContext) {
    if ctx.pkt.flags & PKT_FLAG_CACHED_FLOW == 0 && ctx.pkt.hash64 != 0 && !ctx.matched.is_empty()
    {
        env.cache.register(ctx.pkt.hash64, ctx.matched.clone());
    }
}

fn execute_output(
    env: &PipelineEnv<'_>,
    ctx: &mut PacketContext,
    port: u32,
    action: &Action,
) -> Exec {
    if action.flags & OUTPUT_COPIED_PACKET != 0 {
        // Later work still mutates this packet; transmit a copy.
        let mut copy = PacketContext::new(ctx.pkt.clone());
        copy.flow = ctx.flow.clone();
        tx_dispatch(env, &mut copy, port, action.cookie);
        Exec::Ok
    } else {
        register_cache(env, ctx);
        tx_dispatch(env, ctx, port, action.cookie);
        Exec::NoMoreAction
    }
}

/// Transmit toward a port number, reserved values included. Consumes the
/// context's packet logically; the caller must not transmit it again.
fn tx_dispatch(env: &PipelineEnv<'_>, ctx: &mut PacketContext, out_port: u32, cookie: u64) {
    match out_port {
        OFPP_TABLE => {
            // Packet-out only: process through the pipeline from table 0.
            ctx.table_id = 0;
            ctx.flow = None;
            match_and_action(env, ctx);
        }
        OFPP_NORMAL => {
            if let Some(hybrid) = env.hybrid {
                hybrid.forward(env, &mut ctx.pkt);
            } else {
                tracing::debug!("OFPP_NORMAL without a fallback bridge, dropping");
            }
        }
        // Without address learning FLOOD degenerates to ALL.
        OFPP_FLOOD | OFPP_ALL => {
            let in_port = ctx.pkt.in_port;
            for entry in env.ports.iter() {
                let port = entry.value();
                if port.port_no == in_port || !port.can_forward() {
                    continue;
                }
                let mut copy = ctx.pkt.clone();
                send_to_port(env, &mut copy, port);
            }
        }
        OFPP_CONTROLLER => {
            if !env.controller_no_packet_in {
                let reason = match &ctx.flow {
                    Some(flow) if flow.priority == 0 => PacketInReason::NoMatch,
                    _ => PacketInReason::Action,
                };
                send_packet_in(env, &ctx.pkt, reason, OFPCML_NO_BUFFER, cookie, ctx.table_id);
            }
        }
        OFPP_LOCAL => {
            tracing::debug!("OFPP_LOCAL not backed by an interface, dropping");
        }
        OFPP_IN_PORT => {
            let in_port = ctx.pkt.in_port;
            tx_physical_port(env, ctx, in_port);
        }
        port_no => {
            tx_physical_port(env, ctx, port_no);
        }
    }
}

fn tx_physical_port(env: &PipelineEnv<'_>, ctx: &mut PacketContext, port_no: u32) {
    let port = match env.ports.get(&port_no) {
        Some(entry) if entry.can_forward() => entry.value().clone(),
        _ => {
            tracing::debug!(port_no, "tx to absent or blocked port, dropping");
            return;
        }
    };
    send_to_port(env, &mut ctx.pkt, &port);
}

pub(crate) fn send_to_port(env: &PipelineEnv<'_>, pkt: &mut Packet, port: &crate::port::Port) {
    use std::sync::atomic::Ordering;

    let interface = match &port.interface {
        Some(interface) => interface,
        None => return,
    };
    finalize(pkt);
    port.counters.tx_packets.fetch_add(1, Ordering::Relaxed);
    port.counters
        .tx_bytes
        .fetch_add(pkt.len() as u64, Ordering::Relaxed);
    env.io.tx(interface, pkt.data());
}

/// Punt a packet to the controller.
pub fn send_packet_in(
    env: &PipelineEnv<'_>,
    pkt: &Packet,
    reason: PacketInReason,
    max_len: u16,
    cookie: u64,
    table_id: u8,
) {
    let limit = if max_len == OFPCML_NO_BUFFER {
        pkt.len()
    } else {
        pkt.len().min(max_len as usize)
    };
    let packet_in = PacketIn {
        reason,
        table_id,
        cookie,
        in_port: pkt.in_port,
        frame: pkt.data()[..limit].to_vec(),
    };
    let _ = env.events.put_packet_in(env.dpid, packet_in, PACKET_IN_PUT_TIMEOUT);
}

fn punt_invalid_ttl(env: &PipelineEnv<'_>, ctx: &PacketContext, cookie: u64) {
    send_packet_in(
        env,
        &ctx.pkt,
        PacketInReason::InvalidTtl,
        env.miss_send_len,
        cookie,
        ctx.table_id,
    );
}

// ---------------------------------------------------------------------------
// Metering
// ---------------------------------------------------------------------------

/// Meter the packet; `true` means drop it.
pub fn apply_meter(env: &PipelineEnv<'_>, pkt: &mut Packet, meter_id: u32) -> bool {
    let meter = match env.tables.meters.get(meter_id) {
        Some(meter) => meter,
        None => return false,
    };
    match meter.apply(pkt.len(), env.policer, env.now) {
        Some(MeterEffect::Drop) => true,
        Some(MeterEffect::DscpRemark(prec_level)) => {
            remark_packet_dscp(pkt, prec_level);
            false
        }
        None => false,
    }
}

fn remark_packet_dscp(pkt: &mut Packet, prec_level: u8) {
    use ofsw_flowdb::remark_dscp;

    let l3 = match pkt.l3 {
        Some(l3) => l3,
        None => return,
    };
    if pkt.ether_type == ETHERTYPE_IPV4 {
        if pkt.len() > l3 + 1 {
            let d = pkt.data_mut();
            let dscp = remark_dscp(d[l3 + 1] >> 2, prec_level);
            d[l3 + 1] = (d[l3 + 1] & 0x03) | (dscp << 2);
            pkt.flags |= PKT_FLAG_RECALC_IPV4_CKSUM;
        }
    } else if pkt.ether_type == ETHERTYPE_IPV6 && pkt.len() > l3 + 1 {
        let d = pkt.data_mut();
        let dscp = remark_dscp((d[l3] & 0x0f) << 2 | d[l3 + 1] >> 6, prec_level);
        d[l3] = (d[l3] & 0xf0) | (dscp >> 2);
        d[l3 + 1] = (d[l3 + 1] & 0x3f) | ((dscp & 0x03) << 6);
    }
}

// ---------------------------------------------------------------------------
// Group execution
// ---------------------------------------------------------------------------

/// Hash-weighted bucket choice for SELECT groups; zero total weight treats
/// every bucket as weight one.
fn select_bucket<'g>(pkt: &mut Packet, buckets: &'g [Bucket]) -> Option<&'g Bucket> {
    if buckets.is_empty() {
        return None;
    }
    let total: u64 = buckets.iter().map(|b| b.weight as u64).sum();
    let hash = pkt.hash();
    if total == 0 {
        let sel = (hash % buckets.len() as u64) as usize;
        return buckets.get(sel);
    }
    let sel = (hash % total) + 1;
    let mut weight = 0u64;
    buckets.iter().find(|b| {
        weight += b.weight as u64;
        sel <= weight
    })
}

/// First bucket whose watch port or watch group is live.
fn live_bucket<'g>(env: &PipelineEnv<'_>, group: &'g Group) -> Option<&'g Bucket> {
    for bucket in &group.buckets {
        if bucket.watch_port != OFPP_ANY {
            if let Some(port) = env.ports.get(&bucket.watch_port) {
                if port.is_live() {
                    return Some(bucket);
                }
            }
        }
        if bucket.watch_group == OFPG_ANY {
            continue;
        }
        if let Some(watched) = env.tables.groups.get(bucket.watch_group) {
            if live_bucket(env, watched).is_some() {
                return Some(bucket);
            }
        }
    }
    None
}

/// Run the bucket semantics of a group over the packet.
pub fn execute_group(env: &PipelineEnv<'_>, ctx: &mut PacketContext, group_id: u32) -> Exec {
    let group = match env.tables.groups.get(group_id) {
        Some(group) => group,
        None => return Exec::Ok,
    };
    let bytes = ctx.pkt.len() as u64;
    group.hit(bytes);

    match group.gtype {
        GroupType::All => {
            for bucket in &group.buckets {
                bucket.hit(bytes);
                let mut clone = PacketContext::new(ctx.pkt.clone());
                clone.flow = ctx.flow.clone();
                clone.pkt.reclassify();
                execute_merged_set(env, &mut clone, &bucket.action_set);
            }
            register_cache(env, ctx);
            // The original packet is consumed here.
            Exec::NoMoreAction
        }
        GroupType::Select => {
            if let Some(bucket) = select_bucket(&mut ctx.pkt, &group.buckets) {
                bucket.hit(bytes);
                return execute_merged_set(env, ctx, &bucket.action_set);
            }
            Exec::Ok
        }
        GroupType::Indirect => {
            if let Some(bucket) = group.buckets.first() {
                bucket.hit(bytes);
                return execute_merged_set(env, ctx, &bucket.action_set);
            }
            Exec::Ok
        }
        GroupType::FastFailover => {
            if let Some(bucket) = live_bucket(env, group) {
                bucket.hit(bytes);
                return execute_merged_set(env, ctx, &bucket.action_set);
            }
            Exec::Ok
        }
    }
}

// ---------------------------------------------------------------------------
// TTL actions
// ---------------------------------------------------------------------------

fn write_mpls_lse(pkt: &mut Packet, lse: u32) {
    if let Some(mpls) = pkt.mpls {
        if pkt.len() >= mpls + 4 {
            pkt.data_mut()[mpls..mpls + 4].copy_from_slice(&lse.to_be_bytes());
        }
    }
}

/// Copy TTL from the next-outer header onto the outermost MPLS entry.
pub fn copy_ttl_out(pkt: &mut Packet) -> Exec {
    let lse = match mpls_lse_at(pkt) {
        Some(lse) => lse,
        None => return Exec::Ok,
    };
    let ttl = if mpls_bos(lse) != 0 {
        inner_ip_ttl(pkt)
    } else {
        inner_mpls_ttl(pkt)
    };
    if let Some(ttl) = ttl {
        write_mpls_lse(pkt, (lse & !0xff) | ttl as u32);
    }
    Exec::Ok
}

/// Copy TTL from the outermost MPLS entry onto the next-outer header.
pub fn copy_ttl_in(pkt: &mut Packet) -> Exec {
    let lse = match mpls_lse_at(pkt) {
        Some(lse) => lse,
        None => return Exec::Ok,
    };
    let ttl = mpls_ttl(lse);
    if mpls_bos(lse) != 0 {
        set_inner_ip_ttl(pkt, ttl);
    } else if let Some(mpls) = pkt.mpls {
        let inner = mpls + MPLS_HDR_LEN;
        if pkt.len() >= inner + 4 {
            let d = pkt.data_mut();
            d[inner + 3] = ttl;
        }
    }
    Exec::Ok
}

fn inner_ip_ttl(pkt: &Packet) -> Option<u8> {
    let l3 = pkt.l3?;
    let d = pkt.data();
    if pkt.ether_type == ETHERTYPE_IPV4 && d.len() > l3 + 8 && d[l3] >> 4 == 4 {
        Some(d[l3 + 8])
    } else if pkt.ether_type == ETHERTYPE_IPV6 && d.len() > l3 + 7 && d[l3] >> 4 == 6 {
        Some(d[l3 + 7])
    } else {
        None
    }
}

fn set_inner_ip_ttl(pkt: &mut Packet, ttl: u8) {
    let l3 = match pkt.l3 {
        Some(l3) => l3,
        None => return,
    };
    if pkt.ether_type == ETHERTYPE_IPV4 && pkt.len() > l3 + 8 {
        pkt.data_mut()[l3 + 8] = ttl;
        pkt.flags |= PKT_FLAG_RECALC_IPV4_CKSUM;
    } else if pkt.ether_type == ETHERTYPE_IPV6 && pkt.len() > l3 + 7 {
        pkt.data_mut()[l3 + 7] = ttl;
    }
}

fn inner_mpls_ttl(pkt: &Packet) -> Option<u8> {
    let mpls = pkt.mpls?;
    let inner = mpls + MPLS_HDR_LEN;
    let d = pkt.data();
    if d.len() >= inner + 4 {
        Some(d[inner + 3])
    } else {
        None
    }
}

/// OFPAT_SET_MPLS_TTL.
pub fn set_mpls_ttl(pkt: &mut Packet, ttl: u8) -> Exec {
    if let Some(lse) = mpls_lse_at(pkt) {
        write_mpls_lse(pkt, (lse & !0xff) | ttl as u32);
    }
    Exec::Ok
}

/// OFPAT_DEC_MPLS_TTL; `Stop` when the TTL hits zero.
pub fn dec_mpls_ttl(pkt: &mut Packet) -> Exec {
    let lse = match mpls_lse_at(pkt) {
        Some(lse) => lse,
        None => return Exec::Ok,
    };
    let ttl = mpls_ttl(lse);
    let new_ttl = ttl.saturating_sub(1);
    write_mpls_lse(pkt, (lse & !0xff) | new_ttl as u32);
    if new_ttl == 0 {
        return Exec::Stop;
    }
    Exec::Ok
}

/// OFPAT_SET_NW_TTL.
pub fn set_nw_ttl(pkt: &mut Packet, ttl: u8) -> Exec {
    set_inner_ip_ttl(pkt, ttl);
    Exec::Ok
}

/// OFPAT_DEC_NW_TTL; `Stop` when the TTL hits zero.
pub fn dec_nw_ttl(pkt: &mut Packet) -> Exec {
    let l3 = match pkt.l3 {
        Some(l3) => l3,
        None => return Exec::Ok,
    };
    if pkt.ether_type == ETHERTYPE_IPV4 && pkt.len() > l3 + 8 {
        let d = pkt.data_mut();
        if d[l3 + 8] > 0 {
            d[l3 + 8] -= 1;
        }
        let ttl = d[l3 + 8];
        pkt.flags |= PKT_FLAG_RECALC_IPV4_CKSUM;
        if ttl == 0 {
            return Exec::Stop;
        }
    } else if pkt.ether_type == ETHERTYPE_IPV6 && pkt.len() > l3 + 7 {
        let d = pkt.data_mut();
        if d[l3 + 7] > 0 {
            d[l3 + 7] -= 1;
        }
        if d[l3 + 7] == 0 {
            return Exec::Stop;
        }
    }
    Exec::Ok
}

// ---------------------------------------------------------------------------
// Push and pop
// ---------------------------------------------------------------------------

/// OFPAT_PUSH_VLAN: open a tag slot after the Ethernet addresses,
/// inheriting the TCI of an existing outer tag.
pub fn push_vlan(pkt: &mut Packet, tpid: u16) -> Exec {
    let inherited_tci = pkt
        .vlan
        .map(|_| pkt.oob.vlan_tci.to_host() & !OFPVID_PRESENT)
        .unwrap_or(0);
    if !pkt.buffer_mut().insert_gap(12, VLAN_HDR_LEN) {
        return Exec::Stop;
    }
    let d = pkt.data_mut();
    d[12..14].copy_from_slice(&tpid.to_be_bytes());
    d[14..16].copy_from_slice(&inherited_tci.to_be_bytes());
    pkt.reclassify();
    Exec::Ok
}

/// OFPAT_POP_VLAN.
pub fn pop_vlan(pkt: &mut Packet) -> Exec {
    if pkt.vlan.is_none() {
        return Exec::Ok;
    }
    if !pkt.buffer_mut().remove_range(12, VLAN_HDR_LEN) {
        return Exec::Stop;
    }
    pkt.reclassify();
    Exec::Ok
}

/// OFPAT_PUSH_MPLS: insert a label stack entry before the existing stack
/// (or the L3 header), inheriting label, TC and TTL per 1.3 §5.12.1.
pub fn push_mpls(pkt: &mut Packet, ethertype: u16) -> Exec {
    let at = match (pkt.mpls, pkt.l3) {
        (Some(mpls), _) => mpls,
        (None, Some(l3)) => l3,
        (None, None) => return Exec::Ok,
    };
    let lse = match pkt.mpls.and_then(|_| mpls_lse_at(pkt)) {
        Some(outer) => {
            // New entry inherits the old outer entry, BoS cleared.
            outer & !(1 << 8)
        }
        None => {
            let ttl = inner_ip_ttl(pkt).unwrap_or(0);
            mpls_lse(0, 0, 1, ttl)
        }
    };
    if !pkt.buffer_mut().insert_gap(at, MPLS_HDR_LEN) {
        return Exec::Stop;
    }
    let d = pkt.data_mut();
    d[at - 2..at].copy_from_slice(&ethertype.to_be_bytes());
    d[at..at + 4].copy_from_slice(&lse.to_be_bytes());
    pkt.reclassify();
    Exec::Ok
}

/// OFPAT_POP_MPLS with the restored ethertype.
pub fn pop_mpls(pkt: &mut Packet, ethertype: u16) -> Exec {
    let mpls = match pkt.mpls {
        Some(mpls) => mpls,
        None => return Exec::Ok,
    };
    {
        let d = pkt.data_mut();
        d[mpls - 2..mpls].copy_from_slice(&ethertype.to_be_bytes());
    }
    if !pkt.buffer_mut().remove_range(mpls, MPLS_HDR_LEN) {
        return Exec::Stop;
    }
    pkt.reclassify();
    Exec::Ok
}

/// OFPAT_PUSH_PBB: wrap the frame in an I-TAG and backbone addresses,
/// inheriting I-PCP from an outer VLAN and I-SID from an outer PBB.
pub fn push_pbb(pkt: &mut Packet, ethertype: u16) -> Exec {
    let (inherit_pcp, inherit_sid) = match pkt.pbb {
        Some(pbb) if pkt.len() >= pbb + 4 => {
            let d = pkt.data();
            (0u8, [d[pbb + 1], d[pbb + 2], d[pbb + 3]])
        }
        _ => {
            let pcp = pkt
                .vlan
                .map(|_| (pkt.oob.vlan_tci.to_host() >> 13) as u8)
                .unwrap_or(0);
            (pcp << 5, [0, 0, 0])
        }
    };
    let (dst, src) = {
        let d = pkt.data();
        if d.len() < 12 {
            return Exec::Ok;
        }
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&d[0..6]);
        src.copy_from_slice(&d[6..12]);
        (dst, src)
    };
    if !pkt.buffer_mut().insert_gap(12, PBB_HDR_LEN) {
        return Exec::Stop;
    }
    let d = pkt.data_mut();
    d[12..14].copy_from_slice(&ethertype.to_be_bytes());
    d[14] = inherit_pcp;
    d[15..18].copy_from_slice(&inherit_sid);
    d[18..24].copy_from_slice(&dst);
    d[24..30].copy_from_slice(&src);
    pkt.reclassify();
    Exec::Ok
}

/// OFPAT_POP_PBB: restore the customer addresses and strip the backbone
/// header.
pub fn pop_pbb(pkt: &mut Packet) -> Exec {
    let pbb = match pkt.pbb {
        Some(pbb) => pbb,
        None => return Exec::Ok,
    };
    if pkt.len() < pbb + 16 {
        return Exec::Ok;
    }
    {
        let d = pkt.data_mut();
        let mut c_dst = [0u8; 6];
        let mut c_src = [0u8; 6];
        c_dst.copy_from_slice(&d[pbb + 4..pbb + 10]);
        c_src.copy_from_slice(&d[pbb + 10..pbb + 16]);
        d[0..6].copy_from_slice(&c_dst);
        d[6..12].copy_from_slice(&c_src);
    }
    if !pkt.buffer_mut().remove_range(12, pbb + 16 - 12) {
        return Exec::Stop;
    }
    pkt.reclassify();
    Exec::Ok
}

// ---------------------------------------------------------------------------
// Encap / decap (1.4)
// ---------------------------------------------------------------------------

/// OFPAT_ENCAP, reduced to the Ethernet and MPLS envelopes.
pub fn encap(pkt: &mut Packet, target_type: u32) -> Exec {
    if target_type == PACKET_TYPE_ETHERNET {
        if !pkt.buffer_mut().insert_gap(0, ETH_HDR_LEN) {
            return Exec::Stop;
        }
        let d = pkt.data_mut();
        for b in d[..ETH_HDR_LEN].iter_mut() {
            *b = 0;
        }
        pkt.oob.packet_type = PACKET_TYPE_ETHERNET;
        pkt.classify();
        Exec::Ok
    } else if target_type == packet_type(OFPHTN_ETHERTYPE, ETHERTYPE_MPLS)
        || target_type == packet_type(OFPHTN_ETHERTYPE, ETHERTYPE_MPLS_MCAST)
    {
        if !pkt.buffer_mut().insert_gap(0, MPLS_HDR_LEN) {
            return Exec::Stop;
        }
        let lse = mpls_lse(0, 0, 1, 0);
        pkt.data_mut()[..4].copy_from_slice(&lse.to_be_bytes());
        pkt.oob.packet_type = target_type;
        Exec::Ok
    } else {
        tracing::debug!(target_type, "encap: unhandled header type");
        Exec::Stop
    }
}

/// OFPAT_DECAP, reduced to the Ethernet and MPLS envelopes.
pub fn decap(pkt: &mut Packet, cur_pkt_type: u32, new_pkt_type: u32) -> Exec {
    let resolved = if cur_pkt_type == PACKET_TYPE_ETHERNET {
        if pkt.len() < ETH_HDR_LEN {
            return Exec::Stop;
        }
        let ethertype = u16::from_be_bytes([pkt.data()[12], pkt.data()[13]]);
        if !pkt.buffer_mut().remove_range(0, ETH_HDR_LEN) {
            return Exec::Stop;
        }
        packet_type(OFPHTN_ETHERTYPE, ethertype)
    } else if cur_pkt_type == packet_type(OFPHTN_ETHERTYPE, ETHERTYPE_MPLS)
        || cur_pkt_type == packet_type(OFPHTN_ETHERTYPE, ETHERTYPE_MPLS_MCAST)
    {
        if pkt.len() < MPLS_HDR_LEN {
            return Exec::Stop;
        }
        let lse = u32::from_be_bytes([
            pkt.data()[0],
            pkt.data()[1],
            pkt.data()[2],
            pkt.data()[3],
        ]);
        if !pkt.buffer_mut().remove_range(0, MPLS_HDR_LEN) {
            return Exec::Stop;
        }
        if mpls_bos(lse) != 0 {
            PACKET_TYPE_ETHERNET
        } else {
            cur_pkt_type
        }
    } else {
        tracing::debug!(cur_pkt_type, "decap: unhandled header type");
        return Exec::Stop;
    };

    if new_pkt_type == packet_type(OFPHTN_ONF, OFPHTO_USE_NEXT_PROTO) {
        pkt.oob.packet_type = resolved;
    } else {
        pkt.oob.packet_type = new_pkt_type;
    }
    if pkt.oob.packet_type == PACKET_TYPE_ETHERNET {
        pkt.reclassify();
    }
    Exec::Ok
}

// ---------------------------------------------------------------------------
// Set-field
// ---------------------------------------------------------------------------

/// OFPAT_SET_FIELD: rewrite one header field in place, flag the deferred
/// checksum work and re-classify when the layout changed.
pub fn set_field(pkt: &mut Packet, m: &Match) -> Exec {
    let v = &m.value;
    match m.field {
        OxmField::InPort => {
            if v.len() == 4 {
                let port = u32::from_be_bytes([v[0], v[1], v[2], v[3]]);
                pkt.in_port = port;
                pkt.oob.in_port = Be32::from_host(port);
            }
        }
        OxmField::Metadata => {
            if v.len() == 8 {
                pkt.oob.metadata = Be64::from_bytes([
                    v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7],
                ]);
            }
        }
        OxmField::EthDst => {
            if pkt.len() >= 12 && v.len() == 6 {
                pkt.data_mut()[0..6].copy_from_slice(v);
            }
        }
        OxmField::EthSrc => {
            if pkt.len() >= 12 && v.len() == 6 {
                pkt.data_mut()[6..12].copy_from_slice(v);
            }
        }
        OxmField::EthType => {
            if v.len() == 2 {
                let at = match pkt.vlan {
                    Some(vlan) => vlan + 2,
                    None => 12,
                };
                if pkt.len() >= at + 2 {
                    pkt.data_mut()[at..at + 2].copy_from_slice(v);
                    pkt.reclassify();
                }
            }
        }
        OxmField::VlanVid => {
            if let Some(vlan) = pkt.vlan {
                if pkt.len() >= vlan + 2 && v.len() == 2 {
                    let vid = u16::from_be_bytes([v[0], v[1]]) & 0x0fff;
                    let d = pkt.data_mut();
                    let tci = (u16::from_be_bytes([d[vlan], d[vlan + 1]]) & 0xf000) | vid;
                    d[vlan..vlan + 2].copy_from_slice(&tci.to_be_bytes());
                    pkt.oob.vlan_tci = Be16::from_host(tci | OFPVID_PRESENT);
                }
            }
        }
        OxmField::VlanPcp => {
            if let Some(vlan) = pkt.vlan {
                if pkt.len() >= vlan + 2 && v.len() == 1 {
                    let d = pkt.data_mut();
                    let tci = (u16::from_be_bytes([d[vlan], d[vlan + 1]]) & 0x1fff)
                        | ((v[0] as u16) << 13);
                    d[vlan..vlan + 2].copy_from_slice(&tci.to_be_bytes());
                    pkt.oob.vlan_tci = Be16::from_host(tci | OFPVID_PRESENT);
                }
            }
        }
        OxmField::IpDscp => {
            if let Some(l3) = pkt.l3 {
                if pkt.ether_type == ETHERTYPE_IPV4 && pkt.len() > l3 + 1 && v.len() == 1 {
                    let d = pkt.data_mut();
                    d[l3 + 1] = (d[l3 + 1] & 0x03) | (v[0] << 2);
                    pkt.flags |= PKT_FLAG_RECALC_IPV4_CKSUM;
                } else if pkt.ether_type == ETHERTYPE_IPV6 && pkt.len() > l3 + 1 && v.len() == 1 {
                    let d = pkt.data_mut();
                    d[l3] = (d[l3] & 0xf0) | (v[0] >> 2);
                    d[l3 + 1] = (d[l3 + 1] & 0x3f) | ((v[0] & 0x03) << 6);
                }
            }
        }
        OxmField::IpEcn => {
            if let Some(l3) = pkt.l3 {
                if pkt.ether_type == ETHERTYPE_IPV4 && pkt.len() > l3 + 1 && v.len() == 1 {
                    let d = pkt.data_mut();
                    d[l3 + 1] = (d[l3 + 1] & 0xfc) | (v[0] & 0x03);
                    pkt.flags |= PKT_FLAG_RECALC_IPV4_CKSUM;
                } else if pkt.ether_type == ETHERTYPE_IPV6 && pkt.len() > l3 + 1 && v.len() == 1 {
                    let d = pkt.data_mut();
                    d[l3 + 1] = (d[l3 + 1] & 0xcf) | ((v[0] & 0x03) << 4);
                }
            }
        }
        OxmField::Ipv4Src | OxmField::Ipv4Dst => {
            if let Some(l3) = pkt.l3 {
                if pkt.ether_type == ETHERTYPE_IPV4 && pkt.len() >= l3 + 20 && v.len() == 4 {
                    let off = if m.field == OxmField::Ipv4Src {
                        l3 + 12
                    } else {
                        l3 + 16
                    };
                    pkt.data_mut()[off..off + 4].copy_from_slice(v);
                    pkt.flags |= PKT_FLAG_RECALC_IPV4_CKSUM | PKT_FLAG_RECALC_L4_CKSUM;
                }
            }
        }
        OxmField::TcpSrc | OxmField::TcpDst => {
            set_l4_port(pkt, IPPROTO_TCP, m.field == OxmField::TcpDst, v);
        }
        OxmField::UdpSrc | OxmField::UdpDst => {
            set_l4_port(pkt, IPPROTO_UDP, m.field == OxmField::UdpDst, v);
        }
        OxmField::SctpSrc | OxmField::SctpDst => {
            set_l4_port(pkt, IPPROTO_SCTP, m.field == OxmField::SctpDst, v);
        }
        OxmField::Icmpv4Type | OxmField::Icmpv4Code => {
            if let Some(l4) = pkt.l4 {
                if pkt.proto == Some(IPPROTO_ICMP) && pkt.len() > l4 + 1 && v.len() == 1 {
                    let off = l4 + usize::from(m.field == OxmField::Icmpv4Code);
                    pkt.data_mut()[off] = v[0];
                    pkt.flags |= PKT_FLAG_RECALC_L4_CKSUM;
                }
            }
        }
        OxmField::ArpOp | OxmField::ArpSpa | OxmField::ArpTpa | OxmField::ArpSha
        | OxmField::ArpTha => {
            set_arp_field(pkt, m.field, v);
        }
        OxmField::Ipv6Src | OxmField::Ipv6Dst => {
            if let Some(l3) = pkt.l3 {
                if pkt.ether_type == ETHERTYPE_IPV6 && pkt.len() >= l3 + 40 && v.len() == 16 {
                    let off = if m.field == OxmField::Ipv6Src {
                        l3 + 8
                    } else {
                        l3 + 24
                    };
                    pkt.data_mut()[off..off + 16].copy_from_slice(v);
                    pkt.flags |= PKT_FLAG_RECALC_L4_CKSUM | PKT_FLAG_RECALC_ICMPV6_CKSUM;
                }
            }
        }
        OxmField::Ipv6Flabel => {
            if let Some(l3) = pkt.l3 {
                if pkt.ether_type == ETHERTYPE_IPV6 && pkt.len() >= l3 + 4 && v.len() == 4 {
                    let d = pkt.data_mut();
                    d[l3 + 1] = (d[l3 + 1] & 0xf0) | (v[1] & 0x0f);
                    d[l3 + 2] = v[2];
                    d[l3 + 3] = v[3];
                }
            }
        }
        OxmField::Icmpv6Type | OxmField::Icmpv6Code => {
            if let Some(l4) = pkt.l4 {
                if pkt.proto == Some(IPPROTO_ICMPV6) && pkt.len() > l4 + 1 && v.len() == 1 {
                    let off = l4 + usize::from(m.field == OxmField::Icmpv6Code);
                    pkt.data_mut()[off] = v[0];
                    pkt.flags |= PKT_FLAG_RECALC_ICMPV6_CKSUM;
                }
            }
        }
        OxmField::Ipv6NdTarget => {
            if let Some(l4) = pkt.l4 {
                if pkt.proto == Some(IPPROTO_ICMPV6) && pkt.len() >= l4 + 24 && v.len() == 16 {
                    pkt.data_mut()[l4 + 8..l4 + 24].copy_from_slice(v);
                    pkt.flags |= PKT_FLAG_RECALC_ICMPV6_CKSUM;
                }
            }
        }
        OxmField::Ipv6NdSll => {
            if let Some(opt) = pkt.nd_sll {
                if pkt.len() >= opt + 8 && v.len() == 6 {
                    pkt.data_mut()[opt + 2..opt + 8].copy_from_slice(v);
                    pkt.flags |= PKT_FLAG_RECALC_ICMPV6_CKSUM;
                }
            }
        }
        OxmField::Ipv6NdTll => {
            if let Some(opt) = pkt.nd_tll {
                if pkt.len() >= opt + 8 && v.len() == 6 {
                    pkt.data_mut()[opt + 2..opt + 8].copy_from_slice(v);
                    pkt.flags |= PKT_FLAG_RECALC_ICMPV6_CKSUM;
                }
            }
        }
        OxmField::MplsLabel => {
            if let Some(lse) = mpls_lse_at(pkt) {
                if v.len() == 4 {
                    let label = u32::from_be_bytes([v[0], v[1], v[2], v[3]]) & 0xfffff;
                    write_mpls_lse(pkt, (lse & 0xfff) | (label << 12));
                }
            }
        }
        OxmField::MplsTc => {
            if let Some(lse) = mpls_lse_at(pkt) {
                if v.len() == 1 {
                    write_mpls_lse(pkt, (lse & !(0x7 << 9)) | (((v[0] & 0x7) as u32) << 9));
                }
            }
        }
        OxmField::MplsBos => {
            if let Some(lse) = mpls_lse_at(pkt) {
                if v.len() == 1 {
                    write_mpls_lse(pkt, (lse & !(1 << 8)) | (((v[0] & 1) as u32) << 8));
                }
            }
        }
        OxmField::PbbIsid => {
            if let Some(pbb) = pkt.pbb {
                if pkt.len() >= pbb + 4 && v.len() == 3 {
                    pkt.data_mut()[pbb + 1..pbb + 4].copy_from_slice(v);
                }
            }
        }
        OxmField::TunnelId => {
            if v.len() == 8 {
                pkt.oob.tunnel_id = Be64::from_bytes([
                    v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7],
                ]);
            }
        }
        OxmField::PacketType => {
            if v.len() == 4 {
                pkt.oob.packet_type = u32::from_be_bytes([v[0], v[1], v[2], v[3]]);
            }
        }
        // IN_PHY_PORT and IPV6_EXTHDR are pseudo fields with no packet
        // representation to rewrite.
        OxmField::InPhyPort | OxmField::Ipv6Exthdr | OxmField::PbbUca => {}
    }
    Exec::Ok
}

fn set_l4_port(pkt: &mut Packet, want_proto: u8, dst: bool, v: &[u8]) {
    if pkt.proto != Some(want_proto) || v.len() != 2 {
        return;
    }
    if let Some(l4) = pkt.l4 {
        let off = l4 + if dst { 2 } else { 0 };
        if pkt.len() >= off + 2 {
            pkt.data_mut()[off..off + 2].copy_from_slice(v);
            pkt.flags |= PKT_FLAG_RECALC_L4_CKSUM;
        }
    }
}

fn set_arp_field(pkt: &mut Packet, field: OxmField, v: &[u8]) {
    let l3 = match pkt.l3 {
        Some(l3) => l3,
        None => return,
    };
    if pkt.ether_type != ETHERTYPE_ARP || pkt.len() < l3 + 28 {
        return;
    }
    let (off, len) = match field {
        OxmField::ArpOp => (l3 + 6, 2),
        OxmField::ArpSha => (l3 + 8, 6),
        OxmField::ArpSpa => (l3 + 14, 4),
        OxmField::ArpTha => (l3 + 18, 6),
        OxmField::ArpTpa => (l3 + 24, 4),
        _ => return,
    };
    if v.len() == len {
        pkt.data_mut()[off..off + len].copy_from_slice(v);
    }
}
