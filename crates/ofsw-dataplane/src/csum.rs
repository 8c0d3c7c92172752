//! Internet checksum finalization
//!
//! Header-rewriting actions defer checksum work by setting RECALC flags on
//! the packet; transmit paths call [`finalize`] once before handing the
//! frame to the I/O layer.

use ofsw_common::openflow::{
    ETHERTYPE_IPV4, ETHERTYPE_IPV6, IPPROTO_ICMPV6, IPPROTO_TCP, IPPROTO_UDP,
};
use ofsw_packet::{
    Packet, PKT_FLAG_RECALC_ICMPV6_CKSUM, PKT_FLAG_RECALC_IPV4_CKSUM, PKT_FLAG_RECALC_L4_CKSUM,
};

fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for w in &mut chunks {
        sum += u32::from(u16::from_be_bytes([w[0], w[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Recompute the IPv4 header checksum at `l3`.
fn ipv4_header_checksum(data: &mut [u8], l3: usize) {
    let ihl = ((data[l3] & 0x0f) as usize) * 4;
    if data.len() < l3 + ihl {
        return;
    }
    data[l3 + 10] = 0;
    data[l3 + 11] = 0;
    let sum = fold(sum_words(&data[l3..l3 + ihl], 0));
    data[l3 + 10..l3 + 12].copy_from_slice(&sum.to_be_bytes());
}

/// Recompute a transport checksum over the pseudo-header and payload.
fn transport_checksum(data: &mut [u8], l3: usize, l4: usize, proto: u8, is_ipv6: bool, at: usize) {
    if data.len() < at + 2 {
        return;
    }
    data[at] = 0;
    data[at + 1] = 0;
    let seg_len = data.len() - l4;
    let mut sum = 0u32;
    if is_ipv6 {
        sum = sum_words(&data[l3 + 8..l3 + 40], sum);
    } else {
        sum = sum_words(&data[l3 + 12..l3 + 20], sum);
    }
    sum += proto as u32;
    sum += seg_len as u32;
    sum = sum_words(&data[l4..], sum);
    let mut sum = fold(sum);
    // UDP transmits an all-ones checksum in place of zero.
    if proto == IPPROTO_UDP && sum == 0 {
        sum = 0xffff;
    }
    data[at..at + 2].copy_from_slice(&sum.to_be_bytes());
}

/// Apply every deferred checksum the packet recorded, then clear the flags.
pub fn finalize(pkt: &mut Packet) {
    let flags = pkt.flags;
    if flags
        & (PKT_FLAG_RECALC_IPV4_CKSUM | PKT_FLAG_RECALC_L4_CKSUM | PKT_FLAG_RECALC_ICMPV6_CKSUM)
        == 0
    {
        return;
    }
    let l3 = match pkt.l3 {
        Some(l3) => l3,
        None => return,
    };
    let is_ipv4 = pkt.ether_type == ETHERTYPE_IPV4;
    let is_ipv6 = pkt.ether_type == ETHERTYPE_IPV6;
    let proto = pkt.proto;
    let l4 = pkt.l4;

    let data = pkt.data_mut();
    if flags & PKT_FLAG_RECALC_IPV4_CKSUM != 0 && is_ipv4 && data.len() >= l3 + 20 {
        ipv4_header_checksum(data, l3);
    }
    if let (Some(l4), Some(proto)) = (l4, proto) {
        let want_l4 = flags & PKT_FLAG_RECALC_L4_CKSUM != 0
            && (proto == IPPROTO_TCP || proto == IPPROTO_UDP);
        let want_icmp6 = flags & PKT_FLAG_RECALC_ICMPV6_CKSUM != 0 && proto == IPPROTO_ICMPV6;
        if (want_l4 || want_icmp6) && data.len() >= l4 + 8 && (is_ipv4 || is_ipv6) {
            let at = match proto {
                IPPROTO_TCP => l4 + 16,
                IPPROTO_UDP => l4 + 6,
                IPPROTO_ICMPV6 => l4 + 2,
                _ => return,
            };
            transport_checksum(data, l3, l4, proto, is_ipv6, at);
        }
    }
    pkt.flags &= !(PKT_FLAG_RECALC_IPV4_CKSUM
        | PKT_FLAG_RECALC_L4_CKSUM
        | PKT_FLAG_RECALC_ICMPV6_CKSUM);
}
