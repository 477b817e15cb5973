use std::collections::BTreeSet;

use proptest::prelude::*;

use conclave_protocol::{
    Ack, AckData, Fuse, Handshake, Header, Message, MessageId, PeerId, PortOffer, UnreliableFrame,
    UserData,
};

fn arb_peer_id() -> impl Strategy<Value = PeerId> {
    any::<[u8; 16]>().prop_map(PeerId::from_bytes)
}

fn arb_message_id() -> impl Strategy<Value = MessageId> {
    (any::<u64>(), arb_peer_id()).prop_map(|(ts, id)| MessageId::new(ts, id))
}

fn arb_peer_set(max: usize) -> impl Strategy<Value = BTreeSet<PeerId>> {
    prop::collection::btree_set(arb_peer_id(), 0..max)
}

fn arb_header() -> impl Strategy<Value = Header> {
    (
        arb_peer_id(),
        any::<u64>(),
        arb_message_id(),
        arb_peer_set(32),
    )
        .prop_map(|(originator, timestamp, config_id, mut visited)| {
            let mut header = Header::new(originator, timestamp, config_id);
            header.visited.append(&mut visited);
            header
        })
}

fn arb_ack_data() -> impl Strategy<Value = AckData> {
    (arb_message_id(), arb_message_id(), arb_peer_set(32)).prop_map(
        |(message_id, predecessor_id, neighbors)| AckData {
            message_id,
            predecessor_id,
            neighbors,
        },
    )
}

fn arb_message() -> impl Strategy<Value = Message> {
    let fuse = (arb_header(), arb_ack_data(), arb_peer_id()).prop_map(|(header, ack_data, target)| {
        Message::Fuse(Fuse {
            header,
            ack_data,
            target,
        })
    });
    let user_data = (
        arb_header(),
        arb_ack_data(),
        prop::collection::vec(any::<u8>(), 0..4096),
    )
        .prop_map(|(header, ack_data, payload)| {
            Message::UserData(UserData {
                header,
                ack_data,
                payload,
            })
        });
    let port_offer = (
        arb_header(),
        arb_ack_data(),
        arb_peer_id(),
        any::<u16>(),
        any::<u16>(),
    )
        .prop_map(|(header, ack_data, addressee, internal_port, external_port)| {
            Message::PortOffer(PortOffer {
                header,
                ack_data,
                addressee,
                internal_port,
                external_port,
            })
        });
    let ack = (arb_header(), arb_ack_data())
        .prop_map(|(header, ack_data)| Message::Ack(Ack { header, ack_data }));

    prop_oneof![fuse, user_data, port_offer, ack]
}

proptest! {
    /// Any message survives a wire roundtrip, including empty and wide
    /// visited / neighbor sets.
    #[test]
    fn roundtrip_message(msg in arb_message()) {
        let bytes = msg.to_bytes().expect("serialize");
        let decoded = Message::from_bytes(&bytes).expect("deserialize");
        prop_assert_eq!(&msg, &decoded);
    }

    #[test]
    fn roundtrip_handshake(version in any::<u32>(), id in arb_peer_id()) {
        let hs = Handshake { version, peer_id: id };
        let decoded = Handshake::from_bytes(&hs.to_bytes().expect("serialize"))
            .expect("deserialize");
        prop_assert_eq!(hs, decoded);
    }

    #[test]
    fn roundtrip_unreliable_frame(
        source in arb_peer_id(),
        payload in prop::collection::vec(any::<u8>(), 0..8192),
    ) {
        let frame = UnreliableFrame { source, payload };
        let decoded = UnreliableFrame::from_bytes(&frame.to_bytes().expect("serialize"))
            .expect("deserialize");
        prop_assert_eq!(&frame, &decoded);
    }

    /// Message ids order by timestamp first; the originator only breaks
    /// ties within one Lamport instant.
    #[test]
    fn message_id_order_is_timestamp_major(
        a in arb_message_id(),
        b in arb_message_id(),
    ) {
        if a.timestamp < b.timestamp {
            prop_assert!(a < b);
        } else if a.timestamp == b.timestamp {
            prop_assert_eq!(a < b, a.originator < b.originator);
        }
    }

    /// Decoding never panics on arbitrary input.
    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = Message::from_bytes(&bytes);
        let _ = Handshake::from_bytes(&bytes);
        let _ = UnreliableFrame::from_bytes(&bytes);
    }
}
