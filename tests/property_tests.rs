//! Property tests for the frame decoder.

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use solar_modbus::constants::DEFAULT_IDLE_WINDOW;
use solar_modbus::frame::decode_frame;
use solar_modbus::register::{ProtocolDescriptor, RegisterKey};
use solar_modbus::RegisterStore;

/// UINT16 registers `value_0..value_n`, keyed by `stride * i`.
fn descriptor(count: usize, addressing: &str, stride: usize) -> ProtocolDescriptor {
    let mut registers = Map::new();
    for i in 0..count {
        registers.insert(
            format!("{}", i * stride),
            json!({ "name": format!("value_{i}"), "type": "UINT16", "scale": 0.1 }),
        );
    }
    ProtocolDescriptor::from_json_value(json!({
        "addressing": addressing,
        "registers": Value::Object(registers),
    }))
    .unwrap()
}

fn frame(count_field: u16, payload: &[u8]) -> Vec<u8> {
    let mut data = vec![0x01, 0x03, 0x00, 0x00];
    data.extend_from_slice(&count_field.to_be_bytes());
    data.extend_from_slice(payload);
    data
}

fn logical(frame: &[u8], descriptor: &ProtocolDescriptor) -> Vec<(String, String)> {
    let decoded = decode_frame(frame, descriptor).unwrap();
    let mut store = RegisterStore::new(DEFAULT_IDLE_WINDOW);
    store.apply(&decoded.registers, descriptor);
    store
        .snapshot()
        .into_iter()
        .map(|(name, value)| (name, value.to_string()))
        .collect()
}

proptest! {
    #[test]
    fn prop_addressing_modes_agree(words in prop::collection::vec(any::<u16>(), 1..32)) {
        let payload: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        let by_register = descriptor(words.len(), "register", 1);
        let by_byte = descriptor(words.len(), "byte", 2);

        let register_frame = frame(words.len() as u16, &payload);
        let byte_frame = frame(payload.len() as u16, &payload);

        prop_assert_eq!(logical(&register_frame, &by_register), logical(&byte_frame, &by_byte));
    }

    #[test]
    fn prop_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..128)) {
        let desc = descriptor(16, "register", 1);
        let _ = decode_frame(&data, &desc);
    }

    #[test]
    fn prop_truncation_yields_subset(
        words in prop::collection::vec(any::<u16>(), 1..32),
        cut in 0usize..64,
    ) {
        let desc = descriptor(words.len(), "register", 1);
        let payload: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        let full = decode_frame(&frame(words.len() as u16, &payload), &desc).unwrap();

        let keep = payload.len().saturating_sub(cut);
        let partial = decode_frame(&frame(words.len() as u16, &payload[..keep]), &desc).unwrap();

        prop_assert!(partial.registers.len() <= full.registers.len());
        for (key, value) in &partial.registers {
            prop_assert_eq!(full.registers.get(key), Some(value));
        }
    }

    #[test]
    fn prop_unknown_gaps_are_skipped(
        gap in 1usize..8,
        first in any::<u16>(),
        second in any::<u16>(),
    ) {
        // Known registers at 0 and gap + 1, unmapped words between them.
        let mut registers = Map::new();
        registers.insert("0".to_string(), json!({ "name": "first" }));
        registers.insert(format!("{}", gap + 1), json!({ "name": "second" }));
        let desc = ProtocolDescriptor::from_json_value(json!({ "registers": Value::Object(registers) }))
            .unwrap();
        let mut payload = first.to_be_bytes().to_vec();
        payload.extend(std::iter::repeat(0xEE).take(gap * 2));
        payload.extend_from_slice(&second.to_be_bytes());

        let decoded = decode_frame(&frame((gap + 2) as u16, &payload), &desc).unwrap();
        prop_assert_eq!(decoded.registers.len(), 2);
        prop_assert_eq!(
            decoded.get(RegisterKey::holding((gap + 1) as u16)).and_then(|v| v.as_i64()),
            Some(i64::from(second))
        );
    }
}
