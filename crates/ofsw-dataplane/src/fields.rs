//! OXM field extraction and the match predicate
//!
//! For each OXM field, pull the corresponding bytes from a classified
//! packet in network byte order. A field the packet does not carry
//! extracts as `None`, which makes any match on it fail.

use ofsw_common::openflow::*;
use ofsw_flowdb::Match;
use ofsw_packet::{mpls_bos, mpls_label, mpls_tc, Packet};

/// Largest OXM value length (IPv6 addresses and ND targets).
pub const MAX_FIELD_LEN: usize = 16;

/// Extract `field` from the packet into `out`; returns the value length,
/// or `None` when the packet does not carry the field.
pub fn extract_field(pkt: &Packet, field: OxmField, out: &mut [u8; MAX_FIELD_LEN]) -> Option<usize> {
    let d = pkt.data();
    let is_ipv4 = pkt.ether_type == ETHERTYPE_IPV4;
    let is_ipv6 = pkt.ether_type == ETHERTYPE_IPV6;
    let is_arp = pkt.ether_type == ETHERTYPE_ARP;

    match field {
        OxmField::InPort => {
            out[..4].copy_from_slice(pkt.oob.in_port.as_bytes());
            Some(4)
        }
        OxmField::InPhyPort => {
            out[..4].copy_from_slice(pkt.oob.in_phy_port.as_bytes());
            Some(4)
        }
        OxmField::Metadata => {
            out[..8].copy_from_slice(pkt.oob.metadata.as_bytes());
            Some(8)
        }
        OxmField::EthDst => {
            if d.len() < 12 {
                return None;
            }
            out[..6].copy_from_slice(&d[0..6]);
            Some(6)
        }
        OxmField::EthSrc => {
            if d.len() < 12 {
                return None;
            }
            out[..6].copy_from_slice(&d[6..12]);
            Some(6)
        }
        OxmField::EthType => {
            pkt.l3?;
            out[..2].copy_from_slice(pkt.oob.ether_type.as_bytes());
            Some(2)
        }
        // VLAN_VID extracts as OFPVID_NONE for untagged packets so both the
        // "no tag" and "this vid" patterns work with plain comparison.
        OxmField::VlanVid => {
            let tci = pkt.oob.vlan_tci.to_host();
            let vid = tci & (OFPVID_PRESENT | 0x0fff);
            out[..2].copy_from_slice(&vid.to_be_bytes());
            Some(2)
        }
        OxmField::VlanPcp => {
            pkt.vlan?;
            out[0] = (pkt.oob.vlan_tci.to_host() >> 13) as u8;
            Some(1)
        }
        OxmField::IpDscp => {
            let l3 = pkt.l3?;
            if is_ipv4 && d.len() > l3 + 1 {
                out[0] = d[l3 + 1] >> 2;
                Some(1)
            } else if is_ipv6 && d.len() > l3 + 1 {
                out[0] = (d[l3] & 0x0f) << 2 | d[l3 + 1] >> 6;
                Some(1)
            } else {
                None
            }
        }
        OxmField::IpEcn => {
            let l3 = pkt.l3?;
            if is_ipv4 && d.len() > l3 + 1 {
                out[0] = d[l3 + 1] & 0x3;
                Some(1)
            } else if is_ipv6 && d.len() > l3 + 1 {
                out[0] = (d[l3 + 1] >> 4) & 0x3;
                Some(1)
            } else {
                None
            }
        }
        OxmField::IpProto => {
            if is_ipv4 || is_ipv6 {
                out[0] = pkt.proto?;
                Some(1)
            } else {
                None
            }
        }
        OxmField::Ipv4Src => {
            let l3 = pkt.l3?;
            if is_ipv4 && d.len() >= l3 + 20 {
                out[..4].copy_from_slice(&d[l3 + 12..l3 + 16]);
                Some(4)
            } else {
                None
            }
        }
        OxmField::Ipv4Dst => {
            let l3 = pkt.l3?;
            if is_ipv4 && d.len() >= l3 + 20 {
                out[..4].copy_from_slice(&d[l3 + 16..l3 + 20]);
                Some(4)
            } else {
                None
            }
        }
        OxmField::TcpSrc | OxmField::TcpDst => {
            l4_port(pkt, IPPROTO_TCP, field == OxmField::TcpDst, out)
        }
        OxmField::UdpSrc | OxmField::UdpDst => {
            l4_port(pkt, IPPROTO_UDP, field == OxmField::UdpDst, out)
        }
        OxmField::SctpSrc | OxmField::SctpDst => {
            l4_port(pkt, IPPROTO_SCTP, field == OxmField::SctpDst, out)
        }
        OxmField::Icmpv4Type | OxmField::Icmpv4Code => {
            let l4 = pkt.l4?;
            if pkt.proto == Some(IPPROTO_ICMP) && d.len() > l4 + 1 {
                out[0] = d[l4 + usize::from(field == OxmField::Icmpv4Code)];
                Some(1)
            } else {
                None
            }
        }
        OxmField::ArpOp => {
            let l3 = pkt.l3?;
            if is_arp && d.len() >= l3 + 28 {
                out[..2].copy_from_slice(&d[l3 + 6..l3 + 8]);
                Some(2)
            } else {
                None
            }
        }
        OxmField::ArpSpa | OxmField::ArpTpa => {
            let l3 = pkt.l3?;
            if is_arp && d.len() >= l3 + 28 {
                let off = if field == OxmField::ArpSpa {
                    l3 + 14
                } else {
                    l3 + 24
                };
                out[..4].copy_from_slice(&d[off..off + 4]);
                Some(4)
            } else {
                None
            }
        }
        OxmField::ArpSha | OxmField::ArpTha => {
            let l3 = pkt.l3?;
            if is_arp && d.len() >= l3 + 28 {
                let off = if field == OxmField::ArpSha {
                    l3 + 8
                } else {
                    l3 + 18
                };
                out[..6].copy_from_slice(&d[off..off + 6]);
                Some(6)
            } else {
                None
            }
        }
        OxmField::Ipv6Src | OxmField::Ipv6Dst => {
            let l3 = pkt.l3?;
            if is_ipv6 && d.len() >= l3 + 40 {
                let off = if field == OxmField::Ipv6Src {
                    l3 + 8
                } else {
                    l3 + 24
                };
                out[..16].copy_from_slice(&d[off..off + 16]);
                Some(16)
            } else {
                None
            }
        }
        OxmField::Ipv6Flabel => {
            let l3 = pkt.l3?;
            if is_ipv6 && d.len() >= l3 + 4 {
                out[0] = 0;
                out[1] = d[l3 + 1] & 0x0f;
                out[2] = d[l3 + 2];
                out[3] = d[l3 + 3];
                Some(4)
            } else {
                None
            }
        }
        OxmField::Icmpv6Type | OxmField::Icmpv6Code => {
            let l4 = pkt.l4?;
            if pkt.proto == Some(IPPROTO_ICMPV6) && d.len() > l4 + 1 {
                out[0] = d[l4 + usize::from(field == OxmField::Icmpv6Code)];
                Some(1)
            } else {
                None
            }
        }
        OxmField::Ipv6NdTarget => {
            let l4 = pkt.l4?;
            if pkt.proto == Some(IPPROTO_ICMPV6) && d.len() >= l4 + 24 {
                let ty = d[l4];
                if ty == 135 || ty == 136 {
                    out[..16].copy_from_slice(&d[l4 + 8..l4 + 24]);
                    return Some(16);
                }
            }
            None
        }
        OxmField::Ipv6NdSll => {
            let opt = pkt.nd_sll?;
            if d.len() >= opt + 8 {
                out[..6].copy_from_slice(&d[opt + 2..opt + 8]);
                Some(6)
            } else {
                None
            }
        }
        OxmField::Ipv6NdTll => {
            let opt = pkt.nd_tll?;
            if d.len() >= opt + 8 {
                out[..6].copy_from_slice(&d[opt + 2..opt + 8]);
                Some(6)
            } else {
                None
            }
        }
        OxmField::MplsLabel => {
            let lse = mpls_lse_at(pkt)?;
            out[..4].copy_from_slice(&mpls_label(lse).to_be_bytes());
            Some(4)
        }
        OxmField::MplsTc => {
            let lse = mpls_lse_at(pkt)?;
            out[0] = mpls_tc(lse);
            Some(1)
        }
        OxmField::MplsBos => {
            let lse = mpls_lse_at(pkt)?;
            out[0] = mpls_bos(lse);
            Some(1)
        }
        OxmField::PbbIsid => {
            let pbb = pkt.pbb?;
            if d.len() >= pbb + 4 {
                out[..3].copy_from_slice(&d[pbb + 1..pbb + 4]);
                Some(3)
            } else {
                None
            }
        }
        OxmField::TunnelId => {
            out[..8].copy_from_slice(pkt.oob.tunnel_id.as_bytes());
            Some(8)
        }
        OxmField::Ipv6Exthdr => {
            if is_ipv6 {
                out[..2].copy_from_slice(pkt.oob.ipv6_exthdr.as_bytes());
                Some(2)
            } else {
                None
            }
        }
        OxmField::PbbUca => {
            let pbb = pkt.pbb?;
            if d.len() > pbb {
                out[0] = (d[pbb] >> 3) & 1;
                Some(1)
            } else {
                None
            }
        }
        OxmField::PacketType => {
            out[..4].copy_from_slice(&pkt.oob.packet_type.to_be_bytes());
            Some(4)
        }
    }
}

fn l4_port(
    pkt: &Packet,
    want_proto: u8,
    dst: bool,
    out: &mut [u8; MAX_FIELD_LEN],
) -> Option<usize> {
    let l4 = pkt.l4?;
    if pkt.proto != Some(want_proto) {
        return None;
    }
    let d = pkt.data();
    let off = l4 + if dst { 2 } else { 0 };
    if d.len() < off + 2 {
        return None;
    }
    out[..2].copy_from_slice(&d[off..off + 2]);
    Some(2)
}

/// Label stack entry at the outermost MPLS header.
pub fn mpls_lse_at(pkt: &Packet) -> Option<u32> {
    let mpls = pkt.mpls?;
    let d = pkt.data();
    if d.len() < mpls + 4 {
        return None;
    }
    Some(u32::from_be_bytes([
        d[mpls],
        d[mpls + 1],
        d[mpls + 2],
        d[mpls + 3],
    ]))
}

/// One OXM entry against the packet, honoring the mask.
pub fn match_entry(pkt: &Packet, entry: &Match) -> bool {
    let mut buf = [0u8; MAX_FIELD_LEN];
    let len = match extract_field(pkt, entry.field, &mut buf) {
        Some(len) => len,
        None => return false,
    };
    if entry.value.len() != len {
        return false;
    }
    match &entry.mask {
        Some(mask) => buf[..len]
            .iter()
            .zip(entry.value.iter())
            .zip(mask.iter())
            .all(|((p, v), m)| p & m == v & m),
        None => buf[..len] == entry.value[..],
    }
}

/// The whole match list against the packet.
pub fn packet_matches(pkt: &Packet, match_list: &[Match]) -> bool {
    match_list.iter().all(|entry| match_entry(pkt, entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ofsw_packet::mpls_lse;

    fn ipv4_tcp_frame(src_port: u16, dst_port: u16) -> Vec<u8> {
        let mut f = vec![0u8; 14];
        f[0..6].copy_from_slice(&[2, 0, 0, 0, 0, 2]);
        f[6..12].copy_from_slice(&[2, 0, 0, 0, 0, 1]);
        f[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[1] = 0x2e; // dscp 11, ecn 2
        ip[9] = IPPROTO_TCP;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
        f.extend_from_slice(&ip);
        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&src_port.to_be_bytes());
        tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
        f.extend_from_slice(&tcp);
        f
    }

    #[test]
    fn test_basic_fields() {
        let pkt = Packet::new(&ipv4_tcp_frame(1234, 80), 7, 1);
        assert!(match_entry(&pkt, &Match::in_port(7)));
        assert!(!match_entry(&pkt, &Match::in_port(8)));
        assert!(match_entry(&pkt, &Match::eth_type(ETHERTYPE_IPV4)));
        assert!(match_entry(&pkt, &Match::ip_proto(IPPROTO_TCP)));
        assert!(match_entry(&pkt, &Match::ipv4_src([10, 0, 0, 1])));
        assert!(match_entry(
            &pkt,
            &Match::new(OxmField::TcpDst, 80u16.to_be_bytes().to_vec())
        ));
        assert!(match_entry(&pkt, &Match::eth_dst([2, 0, 0, 0, 0, 2])));
    }

    #[test]
    fn test_dscp_ecn() {
        let pkt = Packet::new(&ipv4_tcp_frame(1, 2), 1, 1);
        let mut buf = [0u8; MAX_FIELD_LEN];
        assert_eq!(extract_field(&pkt, OxmField::IpDscp, &mut buf), Some(1));
        assert_eq!(buf[0], 0x2e >> 2);
        assert_eq!(extract_field(&pkt, OxmField::IpEcn, &mut buf), Some(1));
        assert_eq!(buf[0], 0x2);
    }

    #[test]
    fn test_masked_ipv4() {
        let pkt = Packet::new(&ipv4_tcp_frame(1, 2), 1, 1);
        let m = Match::with_mask(
            OxmField::Ipv4Src,
            vec![10, 0, 0, 0],
            vec![255, 255, 255, 0],
        );
        assert!(match_entry(&pkt, &m));
        let m = Match::with_mask(
            OxmField::Ipv4Src,
            vec![10, 1, 0, 0],
            vec![255, 255, 0, 0],
        );
        assert!(!match_entry(&pkt, &m));
    }

    #[test]
    fn test_vlan_vid_none_and_present() {
        let untagged = Packet::new(&ipv4_tcp_frame(1, 2), 1, 1);
        let none = Match::new(OxmField::VlanVid, OFPVID_NONE.to_be_bytes().to_vec());
        assert!(match_entry(&untagged, &none));
        assert!(!match_entry(&untagged, &Match::vlan_vid(100)));

        let mut f = vec![0u8; 12];
        f.extend_from_slice(&ETHERTYPE_VLAN.to_be_bytes());
        f.extend_from_slice(&100u16.to_be_bytes());
        f.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        f.extend_from_slice(&[0x45; 20]);
        let tagged = Packet::new(&f, 1, 1);
        assert!(match_entry(&tagged, &Match::vlan_vid(100)));
        assert!(!match_entry(&tagged, &none));
        // Any-tagged pattern: PRESENT/PRESENT masked match.
        let any = Match::with_mask(
            OxmField::VlanVid,
            OFPVID_PRESENT.to_be_bytes().to_vec(),
            OFPVID_PRESENT.to_be_bytes().to_vec(),
        );
        assert!(match_entry(&tagged, &any));
        assert!(!match_entry(&untagged, &any));
    }

    #[test]
    fn test_absent_field_never_matches() {
        let pkt = Packet::new(&ipv4_tcp_frame(1, 2), 1, 1);
        // No UDP header on a TCP packet.
        assert!(!match_entry(
            &pkt,
            &Match::new(OxmField::UdpDst, 53u16.to_be_bytes().to_vec())
        ));
        // No MPLS stack.
        assert!(!match_entry(
            &pkt,
            &Match::new(OxmField::MplsLabel, 16u32.to_be_bytes().to_vec())
        ));
    }

    #[test]
    fn test_mpls_fields() {
        let mut f = vec![0u8; 12];
        f.extend_from_slice(&ETHERTYPE_MPLS.to_be_bytes());
        f.extend_from_slice(&mpls_lse(1000, 3, 1, 64).to_be_bytes());
        f.extend_from_slice(&[0x45; 20]);
        let pkt = Packet::new(&f, 1, 1);
        assert!(match_entry(
            &pkt,
            &Match::new(OxmField::MplsLabel, 1000u32.to_be_bytes().to_vec())
        ));
        assert!(match_entry(&pkt, &Match::new(OxmField::MplsTc, vec![3])));
        assert!(match_entry(&pkt, &Match::new(OxmField::MplsBos, vec![1])));
        // ETH_TYPE still matches the MPLS ethertype.
        assert!(match_entry(&pkt, &Match::eth_type(ETHERTYPE_MPLS)));
    }

    #[test]
    fn test_packet_matches_all_entries() {
        let pkt = Packet::new(&ipv4_tcp_frame(5, 443), 3, 1);
        let ml = vec![
            Match::in_port(3),
            Match::eth_type(ETHERTYPE_IPV4),
            Match::ip_proto(IPPROTO_TCP),
            Match::new(OxmField::TcpDst, 443u16.to_be_bytes().to_vec()),
        ];
        assert!(packet_matches(&pkt, &ml));
        let bad = vec![Match::in_port(3), Match::ip_proto(IPPROTO_UDP)];
        assert!(!packet_matches(&pkt, &bad));
    }
}
