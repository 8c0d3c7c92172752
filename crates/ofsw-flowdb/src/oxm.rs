//! OXM match fields and match-list validation
//!
//! A match list is an ordered sequence of OXM entries. Validation enforces
//! the OpenFlow prerequisite closure, rejects duplicate fields and checks
//! mask consistency; the pipeline later evaluates the list against a
//! classified packet.

use ofsw_common::error::{bad_match, OfpErrorType};
use ofsw_common::openflow::OxmField;
use ofsw_common::{SwitchError, SwitchResult};
use serde::{Deserialize, Serialize};

/// A single OXM match entry. Values are network byte order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// Field type (OPENFLOW_BASIC class).
    pub field: OxmField,
    /// Value bytes, `field.value_len()` long.
    pub value: Vec<u8>,
    /// Optional mask, same length as `value`.
    pub mask: Option<Vec<u8>>,
}

impl Match {
    /// Exact-value match entry.
    pub fn new(field: OxmField, value: Vec<u8>) -> Self {
        Match {
            field,
            value,
            mask: None,
        }
    }

    /// Masked match entry.
    pub fn with_mask(field: OxmField, value: Vec<u8>, mask: Vec<u8>) -> Self {
        Match {
            field,
            value,
            mask: Some(mask),
        }
    }

    /// IN_PORT match.
    pub fn in_port(port: u32) -> Self {
        Match::new(OxmField::InPort, port.to_be_bytes().to_vec())
    }

    /// ETH_TYPE match.
    pub fn eth_type(ether_type: u16) -> Self {
        Match::new(OxmField::EthType, ether_type.to_be_bytes().to_vec())
    }

    /// ETH_DST match.
    pub fn eth_dst(mac: [u8; 6]) -> Self {
        Match::new(OxmField::EthDst, mac.to_vec())
    }

    /// ETH_SRC match.
    pub fn eth_src(mac: [u8; 6]) -> Self {
        Match::new(OxmField::EthSrc, mac.to_vec())
    }

    /// VLAN_VID match with the PRESENT bit set.
    pub fn vlan_vid(vid: u16) -> Self {
        use ofsw_common::openflow::OFPVID_PRESENT;
        Match::new(
            OxmField::VlanVid,
            (vid | OFPVID_PRESENT).to_be_bytes().to_vec(),
        )
    }

    /// IP_PROTO match.
    pub fn ip_proto(proto: u8) -> Self {
        Match::new(OxmField::IpProto, vec![proto])
    }

    /// IPV4_SRC match.
    pub fn ipv4_src(addr: [u8; 4]) -> Self {
        Match::new(OxmField::Ipv4Src, addr.to_vec())
    }

    /// IPV4_DST match.
    pub fn ipv4_dst(addr: [u8; 4]) -> Self {
        Match::new(OxmField::Ipv4Dst, addr.to_vec())
    }
}

fn bad_match_err(code: u16) -> SwitchError {
    SwitchError::ofp(OfpErrorType::BadMatch, code)
}

/// Prerequisite fields for one OXM field, from the OpenFlow 1.3 table.
/// Empty slice means no prerequisite; the checks beyond presence (specific
/// eth_type or ip_proto values) are the controller's business, presence is
/// ours.
fn prerequisites(field: OxmField) -> &'static [OxmField] {
    use OxmField::*;
    match field {
        InPhyPort => &[InPort],
        VlanPcp => &[VlanVid],
        IpDscp | IpEcn | IpProto | Ipv4Src | Ipv4Dst => &[EthType],
        TcpSrc | TcpDst | UdpSrc | UdpDst | SctpSrc | SctpDst | Icmpv4Type | Icmpv4Code => {
            &[EthType, IpProto]
        }
        ArpOp | ArpSpa | ArpTpa | ArpSha | ArpTha | Ipv6Src | Ipv6Dst | Ipv6Flabel => &[EthType],
        Icmpv6Type | Icmpv6Code | Ipv6NdTarget | Ipv6NdSll | Ipv6NdTll => &[EthType, IpProto],
        Ipv6Exthdr | MplsLabel | MplsTc | MplsBos => &[EthType],
        _ => &[],
    }
}

/// Validate ordering-sensitive prerequisites and duplicate fields.
/// Returns the accumulated `field_bits` set.
pub fn check_prerequisites(match_list: &[Match]) -> SwitchResult<u64> {
    let mut field_bits: u64 = 0;

    for m in match_list {
        if field_bits & m.field.bit() != 0 {
            tracing::info!(field = ?m.field, "duplicate match field");
            return Err(bad_match_err(bad_match::DUP_FIELD));
        }
        field_bits |= m.field.bit();

        for pre in prerequisites(m.field) {
            if field_bits & pre.bit() == 0 {
                tracing::info!(field = ?m.field, missing = ?pre, "match prerequisite missing");
                return Err(bad_match_err(bad_match::BAD_PREREQ));
            }
        }
    }
    Ok(field_bits)
}

/// Masked entries must not carry value bits outside the mask.
pub fn check_masks(match_list: &[Match]) -> SwitchResult<()> {
    for m in match_list {
        if let Some(mask) = &m.mask {
            if mask.len() != m.value.len() {
                return Err(bad_match_err(bad_match::BAD_WILDCARDS));
            }
            for (v, k) in m.value.iter().zip(mask.iter()) {
                if v & !k != 0 {
                    return Err(bad_match_err(bad_match::BAD_WILDCARDS));
                }
            }
        } else if m.value.len() != m.field.value_len() {
            return Err(bad_match_err(bad_match::BAD_WILDCARDS));
        }
    }
    Ok(())
}

/// `true` when `list` contains every entry of `sub`, byte-equal. Used for
/// non-strict modify/delete and stats filtering: an empty `sub` matches
/// every flow.
pub fn match_subsumes(list: &[Match], sub: &[Match]) -> bool {
    sub.iter().all(|needle| list.iter().any(|m| m == needle))
}

/// Ordered equality of two match lists.
pub fn match_lists_equal(a: &[Match], b: &[Match]) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prereq_ok() {
        let ml = vec![
            Match::eth_type(0x0800),
            Match::ip_proto(6),
            Match::new(OxmField::TcpDst, 80u16.to_be_bytes().to_vec()),
        ];
        let bits = check_prerequisites(&ml).unwrap();
        assert_ne!(bits & OxmField::EthType.bit(), 0);
        assert_ne!(bits & OxmField::TcpDst.bit(), 0);
    }

    #[test]
    fn test_prereq_missing_eth_type() {
        let ml = vec![Match::ip_proto(6)];
        let err = check_prerequisites(&ml).unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, bad_match::BAD_PREREQ);
    }

    #[test]
    fn test_prereq_order_matters() {
        // IP_PROTO before ETH_TYPE violates the closure.
        let ml = vec![Match::ip_proto(6), Match::eth_type(0x0800)];
        assert!(check_prerequisites(&ml).is_err());
    }

    #[test]
    fn test_duplicate_field() {
        let ml = vec![Match::in_port(1), Match::in_port(2)];
        let err = check_prerequisites(&ml).unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, bad_match::DUP_FIELD);
    }

    #[test]
    fn test_vlan_pcp_requires_vid() {
        let ml = vec![Match::new(OxmField::VlanPcp, vec![3])];
        assert!(check_prerequisites(&ml).is_err());
        let ml = vec![Match::vlan_vid(100), Match::new(OxmField::VlanPcp, vec![3])];
        assert!(check_prerequisites(&ml).is_ok());
    }

    #[test]
    fn test_mask_consistency() {
        let ok = Match::with_mask(
            OxmField::Ipv4Src,
            vec![10, 0, 0, 0],
            vec![255, 255, 0, 0],
        );
        assert!(check_masks(&[ok]).is_ok());

        let bad = Match::with_mask(
            OxmField::Ipv4Src,
            vec![10, 0, 0, 1],
            vec![255, 255, 0, 0],
        );
        let err = check_masks(&[bad]).unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, bad_match::BAD_WILDCARDS);
    }

    #[test]
    fn test_value_length_checked() {
        let bad = Match::new(OxmField::Ipv4Src, vec![10, 0]);
        assert!(check_masks(&[bad]).is_err());
    }

    #[test]
    fn test_subsumes() {
        let flow = vec![Match::in_port(1), Match::eth_type(0x0800)];
        assert!(match_subsumes(&flow, &[]));
        assert!(match_subsumes(&flow, &[Match::in_port(1)]));
        assert!(!match_subsumes(&flow, &[Match::in_port(2)]));
    }
}
