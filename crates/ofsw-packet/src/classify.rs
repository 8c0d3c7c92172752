//! L2-L4 header classification
//!
//! Populates the packet layout (header offsets, out-of-band data, IPv6
//! extension-header bitmap) over the raw frame without copying. Called once
//! per received packet and re-entered after every header-rewriting action.
//! Malformed headers never fail classification; fields beyond the parsable
//! region stay unset and simply never match.

use ofsw_common::openflow::*;
use ofsw_common::{Be16, Be32, Be64};

use crate::buffer::PacketBuffer;

/// Ethernet header length (dst + src + ethertype).
pub const ETH_HDR_LEN: usize = 14;
/// VLAN tag length (TCI + inner ethertype).
pub const VLAN_HDR_LEN: usize = 4;
/// MPLS label stack entry length.
pub const MPLS_HDR_LEN: usize = 4;
/// PBB header length (I-TAG + customer addresses + customer ethertype).
pub const PBB_HDR_LEN: usize = 18;
/// Fixed IPv6 header length.
pub const IPV6_HDR_LEN: usize = 40;

// Deferred-work and pipeline flags on a packet.
/// IPv4 header checksum must be recomputed before transmit.
pub const PKT_FLAG_RECALC_IPV4_CKSUM: u32 = 1 << 0;
/// TCP/UDP/SCTP checksum must be recomputed before transmit.
pub const PKT_FLAG_RECALC_L4_CKSUM: u32 = 1 << 1;
/// ICMPv6 checksum must be recomputed before transmit.
pub const PKT_FLAG_RECALC_ICMPV6_CKSUM: u32 = 1 << 2;
/// The packet was matched through the flow cache.
pub const PKT_FLAG_CACHED_FLOW: u32 = 1 << 3;
/// The action set holds written actions.
pub const PKT_FLAG_HAS_ACTION: u32 = 1 << 4;

/// Out-of-band pipeline fields carried beside the frame. Values that feed
/// OXM comparisons are stored in network byte order.
#[derive(Debug, Clone, Default)]
pub struct OobData {
    /// Pipeline metadata register.
    pub metadata: Be64,
    /// Ingress OpenFlow port.
    pub in_port: Be32,
    /// Ingress physical port.
    pub in_phy_port: Be32,
    /// Outermost VLAN TCI with OFPVID_PRESENT, zero when untagged.
    pub vlan_tci: Be16,
    /// Ethertype after tag peeling (outer value for MPLS).
    pub ether_type: Be16,
    /// Tunnel id register.
    pub tunnel_id: Be64,
    /// IPv6 extension header pseudo-field.
    pub ipv6_exthdr: Be16,
    /// Packet type namespace pair, updated by encap/decap.
    pub packet_type: u32,
}

/// A frame under classification: buffer plus parsed layout.
///
/// Offsets index into [`data`](Packet::data); `None` means the header is
/// absent or unparsable.
#[derive(Debug, Clone)]
pub struct Packet {
    buf: PacketBuffer,
    /// Ingress port number.
    pub in_port: u32,
    /// Seed for the packet hash (ingress interface index).
    pub hash_seed: u64,
    /// Outermost VLAN header offset (TCI, inner ethertype).
    pub vlan: Option<usize>,
    /// Outermost MPLS label stack entry offset.
    pub mpls: Option<usize>,
    /// Outermost PBB I-TAG offset.
    pub pbb: Option<usize>,
    /// L3 header offset (after all tags and the MPLS stack entry).
    pub l3: Option<usize>,
    /// L4 header offset.
    pub l4: Option<usize>,
    /// L4 payload offset.
    pub l4_payload: Option<usize>,
    /// ICMPv6 ND source link-layer option offset.
    pub nd_sll: Option<usize>,
    /// ICMPv6 ND target link-layer option offset.
    pub nd_tll: Option<usize>,
    /// Effective ethertype (post-peel; inner protocol under MPLS).
    pub ether_type: u16,
    /// IP protocol after extension headers, when L3 parsed.
    pub proto: Option<u8>,
    /// Out-of-band fields.
    pub oob: OobData,
    /// Deferred-work and pipeline flags.
    pub flags: u32,
    /// Lazily computed packet hash; zero means not yet computed.
    pub hash64: u64,
    /// Queue tag from OFPAT_SET_QUEUE.
    pub queue_id: u32,
}

impl Packet {
    /// Stage a received frame and classify it.
    pub fn new(frame: &[u8], in_port: u32, ifindex: u64) -> Self {
        let mut pkt = Packet {
            buf: PacketBuffer::from_frame(frame),
            in_port,
            hash_seed: ifindex,
            vlan: None,
            mpls: None,
            pbb: None,
            l3: None,
            l4: None,
            l4_payload: None,
            nd_sll: None,
            nd_tll: None,
            ether_type: 0,
            proto: None,
            oob: OobData::default(),
            flags: 0,
            hash64: 0,
            queue_id: 0,
        };
        pkt.oob.in_port = Be32::from_host(in_port);
        pkt.oob.in_phy_port = Be32::from_host(in_port);
        pkt.classify();
        pkt
    }

    /// Frame bytes.
    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        self.buf.data()
    }

    /// Mutable frame bytes.
    #[inline(always)]
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.buf.data_mut()
    }

    /// Frame length.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// `true` when the frame is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The underlying buffer, for header surgery.
    pub fn buffer_mut(&mut self) -> &mut PacketBuffer {
        &mut self.buf
    }

    /// Full classification: resets packet type, then walks L2 through L4.
    pub fn classify(&mut self) {
        self.oob.packet_type = PACKET_TYPE_ETHERNET;
        self.reclassify();
    }

    /// Re-run classification after a header mutation. Keeps the cached hash
    /// and packet type.
    pub fn reclassify(&mut self) {
        self.classify_l2();
        match self.ether_type {
            ETHERTYPE_IPV4 => {
                self.classify_ipv4();
                self.classify_l4();
            }
            ETHERTYPE_IPV6 => {
                self.classify_ipv6();
                self.classify_l4();
            }
            _ => {}
        }
    }

    fn read_be16(&self, at: usize) -> u16 {
        let d = self.data();
        u16::from_be_bytes([d[at], d[at + 1]])
    }

    fn classify_l2(&mut self) {
        self.vlan = None;
        self.mpls = None;
        self.pbb = None;
        self.l3 = None;
        self.l4 = None;
        self.l4_payload = None;
        self.nd_sll = None;
        self.nd_tll = None;
        self.proto = None;
        self.oob.vlan_tci = Be16::from_host(0);
        self.oob.ipv6_exthdr = Be16::from_host(0);

        if self.len() < ETH_HDR_LEN {
            self.ether_type = 0;
            self.oob.ether_type = Be16::from_host(0);
            return;
        }

        let mut ether_type = self.read_be16(12);
        let mut l3 = ETH_HDR_LEN;

        // Peel VLAN (single or stacked) and PBB headers, keeping the
        // outermost of each for matching.
        loop {
            match ether_type {
                ETHERTYPE_VLAN | ETHERTYPE_QINQ => {
                    if self.len() < l3 + VLAN_HDR_LEN {
                        break;
                    }
                    if self.vlan.is_none() {
                        self.vlan = Some(l3);
                        let tci = self.read_be16(l3);
                        self.oob.vlan_tci = Be16::from_host(tci | OFPVID_PRESENT);
                    }
                    ether_type = self.read_be16(l3 + 2);
                    l3 += VLAN_HDR_LEN;
                }
                ETHERTYPE_PBB => {
                    if self.len() < l3 + PBB_HDR_LEN {
                        break;
                    }
                    if self.pbb.is_none() {
                        self.pbb = Some(l3);
                    }
                    ether_type = self.read_be16(l3 + 16);
                    l3 += PBB_HDR_LEN;
                }
                _ => break,
            }
        }

        self.ether_type = ether_type;
        self.oob.ether_type = Be16::from_host(ether_type);
        self.l3 = Some(l3);

        if ether_type == ETHERTYPE_MPLS || ether_type == ETHERTYPE_MPLS_MCAST {
            if self.len() < l3 + MPLS_HDR_LEN {
                return;
            }
            self.mpls = Some(l3);
            l3 += MPLS_HDR_LEN;
            self.l3 = Some(l3);
            // MPLS hides the inner protocol; use the first payload nibble
            // (draft-hsmit-isis-aal5mux): 0x45-0x4f IPv4, 0x60-0x6f IPv6.
            if l3 < self.len() {
                let first = self.data()[l3];
                if (0x45..=0x4f).contains(&first) {
                    self.ether_type = ETHERTYPE_IPV4;
                } else if first & 0xf0 == 0x60 {
                    self.ether_type = ETHERTYPE_IPV6;
                }
            }
        }
    }

    fn classify_ipv4(&mut self) {
        let l3 = match self.l3 {
            Some(l3) => l3,
            None => return,
        };
        if self.len() < l3 + 20 {
            return;
        }
        let d = self.data();
        let ihl = ((d[l3] & 0x0f) as usize) * 4;
        if ihl < 20 || self.len() < l3 + ihl {
            return;
        }
        self.proto = Some(d[l3 + 9]);
        self.l4 = Some(l3 + ihl);
    }

    fn classify_ipv6(&mut self) {
        let l3 = match self.l3 {
            Some(l3) => l3,
            None => return,
        };
        if self.len() < l3 + IPV6_HDR_LEN {
            return;
        }

        let mut exthdr: u16 = 0;
        let mut proto = self.data()[l3 + 6];
        let mut off = l3 + IPV6_HDR_LEN;

        loop {
            if off + 2 > self.len() {
                break;
            }
            let d = self.data();
            match proto {
                IPPROTO_HOPOPTS => {
                    if exthdr != 0 {
                        exthdr |= OFPIEH_UNSEQ;
                    }
                    if exthdr & OFPIEH_HOP != 0 {
                        exthdr |= OFPIEH_UNREP;
                    }
                    exthdr |= OFPIEH_HOP;
                    let ext_len = (1 + d[off + 1] as usize) * 8;
                    proto = d[off];
                    off += ext_len;
                }
                IPPROTO_ROUTING => {
                    if exthdr & (OFPIEH_HOP | OFPIEH_DEST | OFPIEH_UNREP) != 0 {
                        exthdr |= OFPIEH_UNSEQ;
                    }
                    if exthdr & OFPIEH_ROUTER != 0 {
                        exthdr |= OFPIEH_UNREP;
                    }
                    exthdr |= OFPIEH_ROUTER;
                    let ext_len = (1 + d[off + 1] as usize) * 8;
                    proto = d[off];
                    off += ext_len;
                }
                IPPROTO_FRAGMENT => {
                    if exthdr & (OFPIEH_HOP | OFPIEH_DEST | OFPIEH_ROUTER | OFPIEH_UNREP) != 0 {
                        exthdr |= OFPIEH_UNSEQ;
                    }
                    if exthdr & OFPIEH_FRAG != 0 {
                        exthdr |= OFPIEH_UNREP;
                    }
                    exthdr |= OFPIEH_FRAG;
                    proto = d[off];
                    off += 8;
                }
                IPPROTO_AH => {
                    if exthdr & OFPIEH_ESP != 0 {
                        exthdr |= OFPIEH_UNSEQ;
                    }
                    if exthdr & OFPIEH_AUTH != 0 {
                        exthdr |= OFPIEH_UNREP;
                    }
                    exthdr |= OFPIEH_AUTH;
                    let ext_len = (2 + d[off + 1] as usize) * 4;
                    proto = d[off];
                    off += ext_len;
                }
                IPPROTO_ESP => {
                    if exthdr & (OFPIEH_DEST | OFPIEH_UNREP) != 0 {
                        exthdr |= OFPIEH_UNSEQ;
                    }
                    if exthdr & OFPIEH_ESP != 0 {
                        exthdr |= OFPIEH_UNREP;
                    }
                    exthdr |= OFPIEH_ESP;
                    let ext_len = (1 + d[off + 1] as usize) * 8;
                    proto = d[off];
                    off += ext_len;
                }
                IPPROTO_DSTOPTS => {
                    if exthdr & OFPIEH_DEST != 0 {
                        exthdr |= OFPIEH_UNREP;
                    }
                    exthdr |= OFPIEH_DEST;
                    let ext_len = (1 + d[off + 1] as usize) * 8;
                    proto = d[off];
                    off += ext_len;
                }
                IPPROTO_NONE => {
                    if exthdr & OFPIEH_NONEXT != 0 {
                        exthdr |= OFPIEH_UNREP;
                    }
                    exthdr |= OFPIEH_NONEXT;
                    break;
                }
                _ => break,
            }
        }

        self.proto = Some(proto);
        // An extension chain that runs past the frame leaves L4 unparsable.
        self.l4 = if off <= self.len() { Some(off) } else { None };
        self.oob.ipv6_exthdr = Be16::from_host(exthdr);
    }

    fn classify_l4(&mut self) {
        let l4 = match self.l4 {
            Some(l4) => l4,
            None => return,
        };
        let proto = match self.proto {
            Some(p) => p,
            None => return,
        };
        match proto {
            IPPROTO_TCP => {
                if self.len() >= l4 + 20 {
                    self.l4_payload = Some(l4 + 20);
                }
            }
            IPPROTO_UDP => {
                if self.len() >= l4 + 8 {
                    self.l4_payload = Some(l4 + 8);
                }
            }
            IPPROTO_SCTP => {
                if self.len() >= l4 + 12 {
                    self.l4_payload = Some(l4 + 12);
                }
            }
            IPPROTO_ICMPV6 => self.classify_icmpv6(l4),
            _ => {}
        }
    }

    /// Walk ND options of a neighbor solicitation/advertisement to locate
    /// the source/target link-layer address options.
    fn classify_icmpv6(&mut self, l4: usize) {
        if self.len() < l4 + 24 {
            return;
        }
        let icmp_type = self.data()[l4];
        let want_opt = match icmp_type {
            135 => 1, // NS: source link-layer address
            136 => 2, // NA: target link-layer address
            _ => return,
        };
        let mut off = l4 + 24;
        while off + 2 <= self.len() {
            let d = self.data();
            let opt_type = d[off];
            let opt_len = d[off + 1] as usize;
            if opt_len == 0 {
                break;
            }
            if opt_type == want_opt && off + 8 <= self.len() {
                if want_opt == 1 {
                    self.nd_sll = Some(off);
                } else {
                    self.nd_tll = Some(off);
                }
                break;
            }
            off += opt_len * 8;
        }
    }

    /// Compute the packet hash if not already done.
    pub fn hash(&mut self) -> u64 {
        if self.hash64 == 0 {
            self.hash64 = self.compute_hash();
        }
        self.hash64
    }

    fn compute_hash(&self) -> u64 {
        let d = self.data();
        let l3_end = self.l3.unwrap_or(d.len().min(ETH_HDR_LEN));
        let mut h = fnv1a(&d[..l3_end.min(d.len())], self.hash_seed);

        match self.ether_type {
            ETHERTYPE_IPV4 => {
                if let Some(l3) = self.l3 {
                    if d.len() >= l3 + 20 {
                        h = fnv1a(&d[l3 + 1..l3 + 2], h); // tos
                        h = fnv1a(&d[l3 + 12..l3 + 20], h); // src + dst
                        h = fnv1a(&d[l3 + 9..l3 + 10], h); // proto
                    }
                }
                h = self.hash_l4(h);
            }
            ETHERTYPE_IPV6 => {
                if let Some(l3) = self.l3 {
                    if d.len() >= l3 + IPV6_HDR_LEN {
                        h = fnv1a(&d[l3..l3 + 4], h);
                        if let Some(p) = self.proto {
                            h = fnv1a(&[p], h);
                        }
                        h = fnv1a(&d[l3 + 8..l3 + 40], h); // src + dst
                    }
                }
                h = self.hash_l4(h);
            }
            ETHERTYPE_ARP => {
                if let Some(l3) = self.l3 {
                    if d.len() >= l3 + 28 {
                        // sha + spa + tha + tpa
                        h = fnv1a(&d[l3 + 8..l3 + 28], h);
                    }
                }
            }
            _ => {}
        }
        // Hash value zero means "not computed".
        if h == 0 {
            1
        } else {
            h
        }
    }

    fn hash_l4(&self, mut h: u64) -> u64 {
        let d = self.data();
        let l4 = match self.l4 {
            Some(l4) => l4,
            None => return h,
        };
        match self.proto {
            Some(IPPROTO_TCP) | Some(IPPROTO_UDP) | Some(IPPROTO_SCTP) => {
                if d.len() >= l4 + 4 {
                    h = fnv1a(&d[l4..l4 + 4], h);
                }
            }
            Some(IPPROTO_ICMP) => {
                if d.len() >= l4 + 2 {
                    h = fnv1a(&d[l4..l4 + 2], h);
                }
            }
            Some(IPPROTO_ICMPV6) => {
                if d.len() >= l4 + 2 {
                    h = fnv1a(&d[l4..l4 + 2], h);
                }
                if let Some(opt) = self.nd_sll.or(self.nd_tll) {
                    if d.len() >= opt + 8 {
                        h = fnv1a(&d[opt + 2..opt + 8], h);
                    }
                }
            }
            _ => {}
        }
        h
    }
}

/// FNV-1a over `bytes`, chained from `seed`.
#[inline]
pub fn fnv1a(bytes: &[u8], seed: u64) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut h = OFFSET ^ seed.wrapping_mul(PRIME);
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(PRIME);
    }
    h
}

/// MPLS label from a label stack entry.
#[inline(always)]
pub fn mpls_label(lse: u32) -> u32 {
    lse >> 12
}

/// MPLS traffic class bits.
#[inline(always)]
pub fn mpls_tc(lse: u32) -> u8 {
    ((lse >> 9) & 0x7) as u8
}

/// MPLS bottom-of-stack bit.
#[inline(always)]
pub fn mpls_bos(lse: u32) -> u8 {
    ((lse >> 8) & 0x1) as u8
}

/// MPLS TTL.
#[inline(always)]
pub fn mpls_ttl(lse: u32) -> u8 {
    (lse & 0xff) as u8
}

/// Assemble a label stack entry.
#[inline(always)]
pub fn mpls_lse(label: u32, tc: u8, bos: u8, ttl: u8) -> u32 {
    (label << 12) | ((tc as u32 & 0x7) << 9) | ((bos as u32 & 0x1) << 8) | ttl as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth_frame(ether_type: u16, payload: &[u8]) -> Vec<u8> {
        let mut f = vec![0u8; ETH_HDR_LEN];
        f[0..6].copy_from_slice(&[2, 0, 0, 0, 0, 2]);
        f[6..12].copy_from_slice(&[2, 0, 0, 0, 0, 1]);
        f[12..14].copy_from_slice(&ether_type.to_be_bytes());
        f.extend_from_slice(payload);
        f
    }

    fn ipv4_header(proto: u8, src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let mut h = vec![0u8; 20];
        h[0] = 0x45;
        h[8] = 64; // ttl
        h[9] = proto;
        h[12..16].copy_from_slice(&src);
        h[16..20].copy_from_slice(&dst);
        h
    }

    #[test]
    fn test_classify_plain_ipv4_tcp() {
        let mut payload = ipv4_header(IPPROTO_TCP, [10, 0, 0, 1], [10, 0, 0, 2]);
        payload.extend_from_slice(&[0u8; 20]); // tcp header
        let pkt = Packet::new(&eth_frame(ETHERTYPE_IPV4, &payload), 1, 1);

        assert_eq!(pkt.ether_type, ETHERTYPE_IPV4);
        assert_eq!(pkt.l3, Some(14));
        assert_eq!(pkt.l4, Some(34));
        assert_eq!(pkt.l4_payload, Some(54));
        assert_eq!(pkt.proto, Some(IPPROTO_TCP));
        assert!(pkt.vlan.is_none());
        assert_eq!(pkt.oob.packet_type, PACKET_TYPE_ETHERNET);
    }

    #[test]
    fn test_classify_single_vlan() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x0064u16.to_be_bytes()); // tci: vid 100
        payload.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        payload.extend_from_slice(&ipv4_header(IPPROTO_UDP, [1, 1, 1, 1], [2, 2, 2, 2]));
        payload.extend_from_slice(&[0u8; 8]);
        let pkt = Packet::new(&eth_frame(ETHERTYPE_VLAN, &payload), 1, 1);

        assert_eq!(pkt.vlan, Some(14));
        assert_eq!(pkt.oob.vlan_tci.to_host(), 0x0064 | OFPVID_PRESENT);
        assert_eq!(pkt.ether_type, ETHERTYPE_IPV4);
        assert_eq!(pkt.l3, Some(18));
        assert_eq!(pkt.l4, Some(38));
    }

    #[test]
    fn test_classify_double_tagged() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x0010u16.to_be_bytes()); // outer tci
        payload.extend_from_slice(&ETHERTYPE_VLAN.to_be_bytes());
        payload.extend_from_slice(&0x0020u16.to_be_bytes()); // inner tci
        payload.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        payload.extend_from_slice(&ipv4_header(IPPROTO_TCP, [1, 1, 1, 1], [2, 2, 2, 2]));
        let pkt = Packet::new(&eth_frame(ETHERTYPE_QINQ, &payload), 1, 1);

        // Outermost tag wins for matching.
        assert_eq!(pkt.vlan, Some(14));
        assert_eq!(pkt.oob.vlan_tci.to_host(), 0x0010 | OFPVID_PRESENT);
        assert_eq!(pkt.l3, Some(22));
        assert_eq!(pkt.ether_type, ETHERTYPE_IPV4);
    }

    #[test]
    fn test_classify_mpls_ipv4_heuristic() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&mpls_lse(16, 0, 1, 64).to_be_bytes());
        payload.extend_from_slice(&ipv4_header(IPPROTO_TCP, [1, 1, 1, 1], [2, 2, 2, 2]));
        payload.extend_from_slice(&[0u8; 20]);
        let pkt = Packet::new(&eth_frame(ETHERTYPE_MPLS, &payload), 1, 1);

        assert_eq!(pkt.mpls, Some(14));
        // Matching sees the MPLS ethertype; internals see IPv4.
        assert_eq!(pkt.oob.ether_type.to_host(), ETHERTYPE_MPLS);
        assert_eq!(pkt.ether_type, ETHERTYPE_IPV4);
        assert_eq!(pkt.l3, Some(18));
        assert_eq!(pkt.l4, Some(38));
    }

    #[test]
    fn test_classify_ipv6_exthdr_bitmap() {
        let mut v6 = vec![0u8; IPV6_HDR_LEN];
        v6[0] = 0x60;
        v6[6] = IPPROTO_HOPOPTS;
        // hop-by-hop: next = dstopts, len 0 (8 bytes)
        let mut hop = vec![0u8; 8];
        hop[0] = IPPROTO_DSTOPTS;
        // dstopts: next = tcp, len 0
        let mut dst = vec![0u8; 8];
        dst[0] = IPPROTO_TCP;
        let mut payload = v6;
        payload.extend_from_slice(&hop);
        payload.extend_from_slice(&dst);
        payload.extend_from_slice(&[0u8; 20]);
        let pkt = Packet::new(&eth_frame(ETHERTYPE_IPV6, &payload), 1, 1);

        assert_eq!(pkt.proto, Some(IPPROTO_TCP));
        let bits = pkt.oob.ipv6_exthdr.to_host();
        assert_ne!(bits & OFPIEH_HOP, 0);
        assert_ne!(bits & OFPIEH_DEST, 0);
        assert_eq!(bits & OFPIEH_UNSEQ, 0);
        assert_eq!(pkt.l4, Some(14 + 40 + 16));
    }

    #[test]
    fn test_classify_ipv6_unseq_and_unrep() {
        let mut v6 = vec![0u8; IPV6_HDR_LEN];
        v6[0] = 0x60;
        v6[6] = IPPROTO_DSTOPTS;
        let mut dst = vec![0u8; 8];
        dst[0] = IPPROTO_HOPOPTS; // hop after dest: out of order
        let mut hop = vec![0u8; 8];
        hop[0] = IPPROTO_NONE;
        let mut payload = v6;
        payload.extend_from_slice(&dst);
        payload.extend_from_slice(&hop);
        payload.extend_from_slice(&[0u8; 4]);
        let pkt = Packet::new(&eth_frame(ETHERTYPE_IPV6, &payload), 1, 1);

        let bits = pkt.oob.ipv6_exthdr.to_host();
        assert_ne!(bits & OFPIEH_UNSEQ, 0);
        assert_ne!(bits & OFPIEH_HOP, 0);
        assert_ne!(bits & OFPIEH_DEST, 0);
    }

    #[test]
    fn test_classify_icmpv6_ns_sll() {
        let mut v6 = vec![0u8; IPV6_HDR_LEN];
        v6[0] = 0x60;
        v6[6] = IPPROTO_ICMPV6;
        let mut icmp = vec![0u8; 24]; // type/code/cksum/reserved + target
        icmp[0] = 135;
        let mut opt = vec![1u8, 1]; // type 1 (SLL), len 1 (8 bytes)
        opt.extend_from_slice(&[0xaa; 6]);
        let mut payload = v6;
        payload.extend_from_slice(&icmp);
        payload.extend_from_slice(&opt);
        let pkt = Packet::new(&eth_frame(ETHERTYPE_IPV6, &payload), 1, 1);

        assert_eq!(pkt.nd_sll, Some(14 + 40 + 24));
        assert!(pkt.nd_tll.is_none());
    }

    #[test]
    fn test_truncated_frame_leaves_fields_unset() {
        let pkt = Packet::new(&[0u8; 10], 1, 1);
        assert!(pkt.l3.is_none());
        assert_eq!(pkt.ether_type, 0);

        // Ethernet header claims IPv4 but carries no L3 bytes.
        let pkt = Packet::new(&eth_frame(ETHERTYPE_IPV4, &[0u8; 4]), 1, 1);
        assert_eq!(pkt.l3, Some(14));
        assert!(pkt.l4.is_none());
        assert!(pkt.proto.is_none());
    }

    #[test]
    fn test_hash_stable_and_flow_sensitive() {
        let mut payload = ipv4_header(IPPROTO_TCP, [10, 0, 0, 1], [10, 0, 0, 2]);
        payload.extend_from_slice(&[0u8; 20]);
        let frame = eth_frame(ETHERTYPE_IPV4, &payload);
        let mut a = Packet::new(&frame, 1, 1);
        let mut b = Packet::new(&frame, 1, 1);
        assert_eq!(a.hash(), b.hash());

        let mut payload2 = ipv4_header(IPPROTO_TCP, [10, 0, 0, 9], [10, 0, 0, 2]);
        payload2.extend_from_slice(&[0u8; 20]);
        let mut c = Packet::new(&eth_frame(ETHERTYPE_IPV4, &payload2), 1, 1);
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_reclassify_idempotent() {
        let mut payload = ipv4_header(IPPROTO_UDP, [1, 2, 3, 4], [5, 6, 7, 8]);
        payload.extend_from_slice(&[0u8; 8]);
        let mut pkt = Packet::new(&eth_frame(ETHERTYPE_IPV4, &payload), 1, 1);
        let l4 = pkt.l4;
        let et = pkt.ether_type;
        pkt.reclassify();
        assert_eq!(pkt.l4, l4);
        assert_eq!(pkt.ether_type, et);
    }

    #[test]
    fn test_mpls_lse_helpers() {
        let lse = mpls_lse(100, 5, 1, 63);
        assert_eq!(mpls_label(lse), 100);
        assert_eq!(mpls_tc(lse), 5);
        assert_eq!(mpls_bos(lse), 1);
        assert_eq!(mpls_ttl(lse), 63);
    }
}
