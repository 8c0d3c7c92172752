//! OpenFlow 1.3/1.4 numeric constants and small enums
//!
//! The core consumes decoded control messages, so only the values referenced
//! by validation and execution live here; nothing in this module parses
//! wire bytes.

use serde::{Deserialize, Serialize};

/// Wire protocol version number for OpenFlow 1.3.
pub const OPENFLOW_VERSION_1_3: u8 = 4;
/// Wire protocol version number for OpenFlow 1.4.
pub const OPENFLOW_VERSION_1_4: u8 = 5;

// Reserved and limit port numbers (ofp_port_no).
/// Maximum physical port number.
pub const OFPP_MAX: u32 = 0xffff_ff00;
/// Output to the ingress port.
pub const OFPP_IN_PORT: u32 = 0xffff_fff8;
/// Submit to the first flow table (packet-out only).
pub const OFPP_TABLE: u32 = 0xffff_fff9;
/// Forward using the non-OpenFlow bridge fallback.
pub const OFPP_NORMAL: u32 = 0xffff_fffa;
/// Flood to all forwarding ports except ingress.
pub const OFPP_FLOOD: u32 = 0xffff_fffb;
/// Send to all ports except ingress.
pub const OFPP_ALL: u32 = 0xffff_fffc;
/// Punt to the controller.
pub const OFPP_CONTROLLER: u32 = 0xffff_fffd;
/// Local switch stack port.
pub const OFPP_LOCAL: u32 = 0xffff_fffe;
/// Wildcard port for delete/stats filtering.
pub const OFPP_ANY: u32 = 0xffff_ffff;

// Group numbers (ofp_group).
/// Last usable group id.
pub const OFPG_MAX: u32 = 0xffff_ff00;
/// All groups, valid for delete.
pub const OFPG_ALL: u32 = 0xffff_fffc;
/// Wildcard group for filtering and watch_group.
pub const OFPG_ANY: u32 = 0xffff_ffff;

// Meter numbers (ofp_meter).
/// Last usable meter id.
pub const OFPM_MAX: u32 = 0xffff_0000;
/// Meter for slow-path traffic.
pub const OFPM_SLOWPATH: u32 = 0xffff_fffd;
/// Meter for controller traffic.
pub const OFPM_CONTROLLER: u32 = 0xffff_fffe;
/// All meters, valid for delete and stats.
pub const OFPM_ALL: u32 = 0xffff_ffff;

// Table numbers (ofp_table).
/// Last usable table id.
pub const OFPTT_MAX: u8 = 0xfe;
/// All tables, valid for delete and stats only.
pub const OFPTT_ALL: u8 = 0xff;

/// VLAN id "a tag is present" marker bit.
pub const OFPVID_PRESENT: u16 = 0x1000;
/// Match packets without a VLAN tag.
pub const OFPVID_NONE: u16 = 0x0000;

/// Do not buffer the punted packet.
pub const OFPCML_NO_BUFFER: u16 = 0xffff;

// IPv6 extension header pseudo-field bits (OFPIEH_*).
/// "No next header" encountered.
pub const OFPIEH_NONEXT: u16 = 1 << 0;
/// Encapsulating Security Payload present.
pub const OFPIEH_ESP: u16 = 1 << 1;
/// Authentication header present.
pub const OFPIEH_AUTH: u16 = 1 << 2;
/// Destination options present.
pub const OFPIEH_DEST: u16 = 1 << 3;
/// Fragment header present.
pub const OFPIEH_FRAG: u16 = 1 << 4;
/// Routing header present.
pub const OFPIEH_ROUTER: u16 = 1 << 5;
/// Hop-by-hop options present.
pub const OFPIEH_HOP: u16 = 1 << 6;
/// A header was repeated.
pub const OFPIEH_UNREP: u16 = 1 << 7;
/// Headers out of preferred order.
pub const OFPIEH_UNSEQ: u16 = 1 << 8;

// Flow mod flags (OFPFF_*).
/// Send OFPT_FLOW_REMOVED when the flow dies.
pub const OFPFF_SEND_FLOW_REM: u16 = 1 << 0;
/// Reject overlapping adds.
pub const OFPFF_CHECK_OVERLAP: u16 = 1 << 1;
/// Reset packet/byte counters on overwrite.
pub const OFPFF_RESET_COUNTS: u16 = 1 << 2;
/// Do not keep a packet counter.
pub const OFPFF_NO_PKT_COUNTS: u16 = 1 << 3;
/// Do not keep a byte counter.
pub const OFPFF_NO_BYT_COUNTS: u16 = 1 << 4;

/// Counter value reported when counting is disabled.
pub const COUNTER_UNAVAILABLE: u64 = u64::MAX;

/// Flow removed reasons (OFPRR_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum FlowRemovedReason {
    IdleTimeout = 0,
    HardTimeout = 1,
    Delete = 2,
    GroupDelete = 3,
}

/// Packet-in reasons (OFPR_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum PacketInReason {
    NoMatch = 0,
    Action = 1,
    InvalidTtl = 2,
}

/// Port status reasons (OFPPR_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum PortStatusReason {
    Add = 0,
    Delete = 1,
    Modify = 2,
}

// Port config bits (OFPPC_*).
/// Port administratively down.
pub const OFPPC_PORT_DOWN: u32 = 1 << 0;
/// Drop received packets.
pub const OFPPC_NO_RECV: u32 = 1 << 2;
/// Do not forward out of this port.
pub const OFPPC_NO_FWD: u32 = 1 << 5;
/// Do not punt packet-in from this port.
pub const OFPPC_NO_PACKET_IN: u32 = 1 << 6;

// Port state bits (OFPPS_*).
/// No physical link.
pub const OFPPS_LINK_DOWN: u32 = 1 << 0;
/// Blocked by a non-OpenFlow protocol.
pub const OFPPS_BLOCKED: u32 = 1 << 1;
/// Live for fast-failover purposes.
pub const OFPPS_LIVE: u32 = 1 << 2;

// Switch capability bits (OFPC_*).
/// Flow statistics supported.
pub const OFPC_FLOW_STATS: u32 = 1 << 0;
/// Table statistics supported.
pub const OFPC_TABLE_STATS: u32 = 1 << 1;
/// Port statistics supported.
pub const OFPC_PORT_STATS: u32 = 1 << 2;
/// Group statistics supported.
pub const OFPC_GROUP_STATS: u32 = 1 << 3;
/// IP fragment reassembly supported.
pub const OFPC_IP_REASM: u32 = 1 << 5;
/// Queue statistics supported.
pub const OFPC_QUEUE_STATS: u32 = 1 << 6;
/// Blocked-port detection supported.
pub const OFPC_PORT_BLOCKED: u32 = 1 << 8;

/// Group types (OFPGT_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum GroupType {
    All = 0,
    Select = 1,
    Indirect = 2,
    FastFailover = 3,
}

// Group capability bits (OFPGFC_*).
/// Weighted bucket selection supported.
pub const OFPGFC_SELECT_WEIGHT: u32 = 1 << 0;
/// Liveness-aware select supported.
pub const OFPGFC_SELECT_LIVENESS: u32 = 1 << 1;
/// Group chaining supported.
pub const OFPGFC_CHAINING: u32 = 1 << 2;
/// Chaining loop checks performed.
pub const OFPGFC_CHAINING_CHECKS: u32 = 1 << 3;

// Meter flags (OFPMF_*).
/// Rate in kilobits per second.
pub const OFPMF_KBPS: u16 = 1 << 0;
/// Rate in packets per second.
pub const OFPMF_PKTPS: u16 = 1 << 1;
/// Burst size honored.
pub const OFPMF_BURST: u16 = 1 << 2;
/// Band statistics collected.
pub const OFPMF_STATS: u16 = 1 << 3;

/// Meter band kinds (OFPMBT_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum MeterBandKind {
    Drop = 1,
    DscpRemark = 2,
    Experimenter = 0xffff,
}

/// Flow mod commands (OFPFC_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum FlowModCommand {
    Add = 0,
    Modify = 1,
    ModifyStrict = 2,
    Delete = 3,
    DeleteStrict = 4,
}

/// Group mod commands (OFPGC_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum GroupModCommand {
    Add = 0,
    Modify = 1,
    Delete = 2,
}

/// Meter mod commands (OFPMC_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum MeterModCommand {
    Add = 0,
    Modify = 1,
    Delete = 2,
}

// Packet type namespaces (OFPHTN_*) for encap/decap.
/// ONF defined header types.
pub const OFPHTN_ONF: u16 = 0;
/// Header named by ethertype.
pub const OFPHTN_ETHERTYPE: u16 = 1;
/// Header named by IP protocol.
pub const OFPHTN_IP_PROTO: u16 = 2;
/// Header named by UDP/TCP port.
pub const OFPHTN_UDP_TCP_PORT: u16 = 3;

/// ONF header type: Ethernet.
pub const OFPHTO_ETHERNET: u16 = 0;
/// ONF header type: resolve from the next protocol field.
pub const OFPHTO_USE_NEXT_PROTO: u16 = 0xfffe;

/// Packed packet type value `(namespace << 16) | ns_type`.
#[inline(always)]
pub const fn packet_type(namespace: u16, ns_type: u16) -> u32 {
    ((namespace as u32) << 16) | ns_type as u32
}

/// Default packet type of a classified frame.
pub const PACKET_TYPE_ETHERNET: u32 = packet_type(OFPHTN_ONF, OFPHTO_ETHERNET);

// Ethertypes the classifier understands.
/// IPv4.
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// ARP.
pub const ETHERTYPE_ARP: u16 = 0x0806;
/// 802.1Q VLAN tag.
pub const ETHERTYPE_VLAN: u16 = 0x8100;
/// 802.1ad provider tag.
pub const ETHERTYPE_QINQ: u16 = 0x88a8;
/// IPv6.
pub const ETHERTYPE_IPV6: u16 = 0x86dd;
/// MPLS unicast.
pub const ETHERTYPE_MPLS: u16 = 0x8847;
/// MPLS multicast.
pub const ETHERTYPE_MPLS_MCAST: u16 = 0x8848;
/// 802.1ah PBB.
pub const ETHERTYPE_PBB: u16 = 0x88e7;

// IP protocol numbers referenced by classification and matching.
/// IPv6 hop-by-hop options.
pub const IPPROTO_HOPOPTS: u8 = 0;
/// ICMP.
pub const IPPROTO_ICMP: u8 = 1;
/// TCP.
pub const IPPROTO_TCP: u8 = 6;
/// UDP.
pub const IPPROTO_UDP: u8 = 17;
/// IPv6 routing header.
pub const IPPROTO_ROUTING: u8 = 43;
/// IPv6 fragment header.
pub const IPPROTO_FRAGMENT: u8 = 44;
/// Encapsulating security payload.
pub const IPPROTO_ESP: u8 = 50;
/// Authentication header.
pub const IPPROTO_AH: u8 = 51;
/// ICMPv6.
pub const IPPROTO_ICMPV6: u8 = 58;
/// IPv6 no next header.
pub const IPPROTO_NONE: u8 = 59;
/// IPv6 destination options.
pub const IPPROTO_DSTOPTS: u8 = 60;
/// SCTP.
pub const IPPROTO_SCTP: u8 = 132;

/// Instruction type numbers (OFPIT_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum InstructionKind {
    GotoTable = 1,
    WriteMetadata = 2,
    WriteActions = 3,
    ApplyActions = 4,
    ClearActions = 5,
    Meter = 6,
    Experimenter = 0xffff,
}

/// Action type numbers (OFPAT_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum ActionKind {
    Output = 0,
    CopyTtlOut = 11,
    CopyTtlIn = 12,
    SetMplsTtl = 15,
    DecMplsTtl = 16,
    PushVlan = 17,
    PopVlan = 18,
    PushMpls = 19,
    PopMpls = 20,
    SetQueue = 21,
    Group = 22,
    SetNwTtl = 23,
    DecNwTtl = 24,
    SetField = 25,
    PushPbb = 26,
    PopPbb = 27,
    Encap = 28,
    Decap = 29,
    Experimenter = 0xffff,
}

/// OpenFlow basic OXM match field numbers (OFPXMT_OFB_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum OxmField {
    InPort = 0,
    InPhyPort = 1,
    Metadata = 2,
    EthDst = 3,
    EthSrc = 4,
    EthType = 5,
    VlanVid = 6,
    VlanPcp = 7,
    IpDscp = 8,
    IpEcn = 9,
    IpProto = 10,
    Ipv4Src = 11,
    Ipv4Dst = 12,
    TcpSrc = 13,
    TcpDst = 14,
    UdpSrc = 15,
    UdpDst = 16,
    SctpSrc = 17,
    SctpDst = 18,
    Icmpv4Type = 19,
    Icmpv4Code = 20,
    ArpOp = 21,
    ArpSpa = 22,
    ArpTpa = 23,
    ArpSha = 24,
    ArpTha = 25,
    Ipv6Src = 26,
    Ipv6Dst = 27,
    Ipv6Flabel = 28,
    Icmpv6Type = 29,
    Icmpv6Code = 30,
    Ipv6NdTarget = 31,
    Ipv6NdSll = 32,
    Ipv6NdTll = 33,
    MplsLabel = 34,
    MplsTc = 35,
    MplsBos = 36,
    PbbIsid = 37,
    TunnelId = 38,
    Ipv6Exthdr = 39,
    PbbUca = 41,
    PacketType = 44,
}

impl OxmField {
    /// Bit position inside a `field_bits` set.
    #[inline(always)]
    pub const fn bit(self) -> u64 {
        1u64 << (self as u8)
    }

    /// Expected value length in bytes for this field.
    pub const fn value_len(self) -> usize {
        use OxmField::*;
        match self {
            InPort | InPhyPort | Ipv4Src | Ipv4Dst | ArpSpa | ArpTpa | MplsLabel
            | Ipv6Flabel | PacketType => 4,
            Metadata | TunnelId => 8,
            EthDst | EthSrc | ArpSha | ArpTha | Ipv6NdSll | Ipv6NdTll => 6,
            EthType | VlanVid | TcpSrc | TcpDst | UdpSrc | UdpDst | SctpSrc | SctpDst
            | ArpOp | Ipv6Exthdr => 2,
            VlanPcp | IpDscp | IpEcn | IpProto | Icmpv4Type | Icmpv4Code | Icmpv6Type
            | Icmpv6Code | MplsTc | MplsBos | PbbUca => 1,
            Ipv6Src | Ipv6Dst | Ipv6NdTarget => 16,
            PbbIsid => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_port_values() {
        assert!(OFPP_MAX < OFPP_IN_PORT);
        assert_eq!(OFPP_ANY, u32::MAX);
    }

    #[test]
    fn test_packet_type_packing() {
        assert_eq!(PACKET_TYPE_ETHERNET, 0);
        assert_eq!(packet_type(OFPHTN_ETHERTYPE, ETHERTYPE_MPLS), 0x0001_8847);
    }

    #[test]
    fn test_oxm_field_lengths() {
        assert_eq!(OxmField::EthDst.value_len(), 6);
        assert_eq!(OxmField::Ipv6Src.value_len(), 16);
        assert_eq!(OxmField::PbbIsid.value_len(), 3);
        assert_eq!(OxmField::VlanVid.value_len(), 2);
    }

    #[test]
    fn test_field_bits_distinct() {
        assert_ne!(OxmField::InPort.bit(), OxmField::InPhyPort.bit());
        assert_eq!(OxmField::Metadata.bit(), 1 << 2);
    }
}
