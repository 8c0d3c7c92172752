//! Classification robustness: arbitrary byte soup must never panic and
//! re-classification must be idempotent.

use ofsw_packet::Packet;
use proptest::prelude::*;

proptest! {
    #[test]
    fn classify_never_panics(frame in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut pkt = Packet::new(&frame, 1, 1);
        let _ = pkt.hash();
    }

    #[test]
    fn reclassify_is_idempotent(frame in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut pkt = Packet::new(&frame, 1, 1);
        let ether_type = pkt.ether_type;
        let l3 = pkt.l3;
        let l4 = pkt.l4;
        let vlan = pkt.vlan;
        let mpls = pkt.mpls;
        let exthdr = pkt.oob.ipv6_exthdr;

        pkt.reclassify();
        prop_assert_eq!(pkt.ether_type, ether_type);
        prop_assert_eq!(pkt.l3, l3);
        prop_assert_eq!(pkt.l4, l4);
        prop_assert_eq!(pkt.vlan, vlan);
        prop_assert_eq!(pkt.mpls, mpls);
        prop_assert_eq!(pkt.oob.ipv6_exthdr, exthdr);
    }

    #[test]
    fn headers_stay_in_bounds(frame in proptest::collection::vec(any::<u8>(), 0..256)) {
        let pkt = Packet::new(&frame, 1, 1);
        let len = pkt.len();
        for off in [pkt.l3, pkt.l4, pkt.vlan, pkt.mpls, pkt.pbb].into_iter().flatten() {
            prop_assert!(off <= len);
        }
    }
}
