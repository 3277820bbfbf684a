//! Property-based tests for the row encoder and the bus framing (proptest).

use proptest::prelude::*;
use serde::Serialize;
use ytclient::bus::{decode_frame, encode_frame, Bus, BusError, DEFAULT_MAX_FRAME_SIZE};
use ytclient::wire;

#[derive(Debug, Clone, Serialize)]
struct Event {
    id: i64,
    name: String,
    active: bool,
    tags: Vec<u32>,
}

fn event() -> impl Strategy<Value = Event> {
    (any::<i64>(), "[a-z0-9 ]{0,16}", any::<bool>(), prop::collection::vec(any::<u32>(), 0..4))
        .prop_map(|(id, name, active, tags)| Event { id, name, active, tags })
}

fn parts() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 0..8)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_encoding_is_deterministic(events in prop::collection::vec(event(), 1..16)) {
        let (names_a, rows_a) = wire::encode(&events).unwrap();
        let (names_b, rows_b) = wire::encode(&events).unwrap();
        prop_assert_eq!(names_a.columns(), names_b.columns());
        prop_assert_eq!(rows_a, rows_b);
    }

    #[test]
    fn prop_rows_read_back_as_records(events in prop::collection::vec(event(), 1..16)) {
        let (names, rows) = wire::encode(&events).unwrap();
        let rowset = wire::write_rowset(&names, &rows);
        let (names, rows) = wire::read_rowset(&rowset).unwrap();

        let decoded = wire::rows_to_json(&names, &rows).unwrap();
        let expected: Vec<serde_json::Value> =
            events.iter().map(|e| serde_json::to_value(e).unwrap()).collect();
        prop_assert_eq!(decoded, expected);
    }

    #[test]
    fn prop_name_table_lists_each_field_once(events in prop::collection::vec(event(), 1..16)) {
        let (names, rows) = wire::encode(&events).unwrap();
        prop_assert_eq!(names.len(), 4);
        prop_assert!(rows.iter().all(|row| row.len() == 4));
    }

    #[test]
    fn prop_frame_preserves_parts(parts in parts()) {
        let frame = encode_frame(&parts, DEFAULT_MAX_FRAME_SIZE).unwrap();
        prop_assert_eq!(decode_frame(&frame).unwrap(), parts);
    }

    #[test]
    fn prop_corrupted_frame_is_rejected(parts in parts(), flip in any::<prop::sample::Index>()) {
        let mut frame = encode_frame(&parts, DEFAULT_MAX_FRAME_SIZE).unwrap();
        let idx = flip.index(frame.len());
        frame[idx] ^= 0xff;
        prop_assert!(decode_frame(&frame).is_err());
    }
}

#[tokio::test]
async fn test_bus_carries_messages_in_order() {
    let (a, b) = tokio::io::duplex(64);
    let (mut client, mut server) = (Bus::new(a), Bus::new(b));

    let sender = tokio::spawn(async move {
        for i in 0..50u32 {
            let body = vec![i as u8; i as usize * 3];
            client.send(&[i.to_be_bytes().to_vec(), body]).await.unwrap();
        }
        client
    });

    for i in 0..50u32 {
        let parts = server.receive().await.unwrap();
        assert_eq!(parts[0], i.to_be_bytes().to_vec());
        assert_eq!(parts[1].len(), i as usize * 3);
    }
    drop(sender.await.unwrap());

    assert!(matches!(server.receive().await, Err(BusError::Closed)));
    assert!(server.is_broken());
}

#[tokio::test]
async fn test_oversized_message_leaves_bus_usable() {
    let (a, b) = tokio::io::duplex(1024);
    let (mut client, mut server) = (Bus::with_max_frame_size(a, 128), Bus::new(b));

    let err = client.send(&[vec![0u8; 512]]).await.unwrap_err();
    assert!(matches!(err, BusError::FrameTooLarge { .. }));
    assert!(!client.is_broken());

    client.send(&[b"small".to_vec()]).await.unwrap();
    assert_eq!(server.receive().await.unwrap(), vec![b"small".to_vec()]);
}
