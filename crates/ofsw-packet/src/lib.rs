//! OpenSwitch packet layer
//!
//! Zero-copy packet buffers and the L2-L4 classifier that populates the
//! per-packet layout consumed by match evaluation and the action engine.

#![warn(missing_docs)]

pub mod buffer;
pub mod classify;

pub use buffer::{PacketBuffer, DEFAULT_HEADROOM, MAX_FRAME_SIZE};
pub use classify::{
    fnv1a, mpls_bos, mpls_label, mpls_lse, mpls_tc, mpls_ttl, OobData, Packet,
    ETH_HDR_LEN, IPV6_HDR_LEN, MPLS_HDR_LEN, PBB_HDR_LEN, PKT_FLAG_CACHED_FLOW,
    PKT_FLAG_HAS_ACTION, PKT_FLAG_RECALC_ICMPV6_CKSUM, PKT_FLAG_RECALC_IPV4_CKSUM,
    PKT_FLAG_RECALC_L4_CKSUM, VLAN_HDR_LEN,
};
