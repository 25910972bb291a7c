//! Frame decoding and write encoding against the shipped protocol files.

use solar_modbus::frame::{append_crc, crc16, decode_frame, encode_for_descriptor, encode_write, WriteValue};
use solar_modbus::register::{ProtocolDescriptor, RawValue, RegisterKey};
use solar_modbus::util::decode_hex;
use solar_modbus::SolarError;

fn protocol(name: &str) -> ProtocolDescriptor {
    let path = format!("{}/protocols/{name}.json", env!("CARGO_MANIFEST_DIR"));
    ProtocolDescriptor::from_file(path).unwrap()
}

#[test]
fn test_decode_pzem_input_registers() {
    let desc = protocol("pzem_v04");
    let frame = decode_hex(
        "01 04 00 00 00 0A 08 FC 00 00 01 F4 00 00 00 73 00 00 04 00 01 F4 00 64 00 00",
    )
    .unwrap();
    let decoded = decode_frame(&frame, &desc).unwrap();

    assert!(decoded.diagnostics.is_empty());
    assert_eq!(decoded.header.function_code, 4);
    assert_eq!(decoded.get(RegisterKey::new(4, 0)), Some(&RawValue::Int(2300)));
    assert_eq!(decoded.get(RegisterKey::new(4, 1)), Some(&RawValue::Int(500)));
    assert_eq!(decoded.get(RegisterKey::new(4, 3)), Some(&RawValue::Int(115)));
    assert_eq!(decoded.get(RegisterKey::new(4, 5)), Some(&RawValue::Int(1024)));
    assert_eq!(decoded.get(RegisterKey::new(4, 9)), Some(&RawValue::Int(0)));
    // Second word of a 32-bit value never decodes on its own.
    assert_eq!(decoded.get(RegisterKey::new(4, 2)), None);
    assert_eq!(decoded.registers.len(), 7);
}

#[test]
fn test_holding_and_input_buckets_are_separate() {
    let desc = protocol("pzem_v04");
    // Holding register 1 is the alarm threshold, input register 1 is current.
    let frame = [0x01, 0x03, 0x00, 0x01, 0x00, 0x01, 0x08, 0x98];
    let decoded = decode_frame(&frame, &desc).unwrap();
    assert_eq!(decoded.get(RegisterKey::holding(1)), Some(&RawValue::Int(2200)));
    assert_eq!(decoded.get(RegisterKey::new(4, 1)), None);
    assert_eq!(
        desc.name_of(RegisterKey::holding(1)),
        Some("power_alarm_threshold")
    );
}

#[test]
fn test_decode_byte_addressed_bms() {
    let desc = protocol("jkbms");
    let mut frame = vec![0x0F, 0x03, 0x12, 0xA6, 0x00, 0x0E];
    // 0x12A6 soc, 0x12A7 unmapped, 0x12A8 capacity, 0x12AC..0x12AF unmapped, 0x12B0 cycles
    frame.extend_from_slice(&[0x55, 0xFF, 0x00, 0x01, 0x86, 0xA0]);
    frame.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD, 0x00, 0x00, 0x00, 0x2A]);
    let decoded = decode_frame(&frame, &desc).unwrap();

    assert_eq!(decoded.get(RegisterKey::holding(0x12A6)), Some(&RawValue::Int(0x55)));
    assert_eq!(decoded.get(RegisterKey::holding(0x12A8)), Some(&RawValue::Int(100_000)));
    assert_eq!(decoded.get(RegisterKey::holding(0x12B0)), Some(&RawValue::Int(42)));
    assert_eq!(decoded.registers.len(), 3);
    assert!(decoded.is_complete());
}

#[test]
fn test_decode_float_meter() {
    let desc = protocol("ddsu666");
    let mut frame = vec![0x01, 0x03, 0x20, 0x00, 0x00, 0x02];
    frame.extend_from_slice(&230.5f32.to_be_bytes());
    let decoded = decode_frame(&frame, &desc).unwrap();
    assert_eq!(decoded.get(RegisterKey::holding(0x2000)), Some(&RawValue::Float(230.5)));
}

#[test]
fn test_truncated_register_keeps_earlier_values() {
    let desc = protocol("pzem_v04");
    // Voltage complete, current cut after two of four bytes.
    let frame = [0x01, 0x04, 0x00, 0x00, 0x00, 0x03, 0x08, 0xFC, 0x00, 0x00];
    let decoded = decode_frame(&frame, &desc).unwrap();
    assert_eq!(decoded.get(RegisterKey::new(4, 0)), Some(&RawValue::Int(2300)));
    assert!(!decoded.is_complete());
    assert!(matches!(
        decoded.diagnostics[0],
        SolarError::TruncatedPayload { needed: 4, available: 2, .. }
    ));
}

#[test]
fn test_header_only_frame_is_empty() {
    let desc = protocol("pzem_v04");
    let decoded = decode_frame(&[0x01, 0x04, 0x00, 0x00, 0x00, 0x00], &desc).unwrap();
    assert!(decoded.is_empty());
}

#[test]
fn test_short_frame_rejected() {
    let desc = protocol("pzem_v04");
    for len in 0..6 {
        let frame = vec![0x01; len];
        assert!(matches!(
            decode_frame(&frame, &desc),
            Err(SolarError::FrameTooShort { .. })
        ));
    }
}

#[test]
fn test_write_echo_carries_no_registers() {
    // A function 6 echo reuses the count field for the value and maps to bucket 6.
    let desc = protocol("pzem_v04");
    let echo = [0x01, 0x06, 0x00, 0x01, 0x00, 0x64, 0xE1, 0xD9];
    let decoded = decode_frame(&echo, &desc).unwrap();
    assert!(decoded.is_empty());
    assert!(decoded.diagnostics.is_empty());
}

#[test]
fn test_encode_single_register_with_crc() {
    let desc = protocol("pzem_v04");
    let frame = encode_for_descriptor(&desc, 1, 0x0001, &WriteValue::Word(100), 6).unwrap();
    assert_eq!(frame, vec![0x01, 0x06, 0x00, 0x01, 0x00, 0x64, 0xE1, 0xD9]);
}

#[test]
fn test_encode_multiple_registers() {
    let frame = encode_write(0x0F, 0x1070, &WriteValue::Words(vec![0x0000, 0x0001]), 16).unwrap();
    assert_eq!(
        frame,
        vec![0x0F, 0x10, 0x10, 0x70, 0x00, 0x02, 0x04, 0x00, 0x00, 0x00, 0x01]
    );
}

#[test]
fn test_encode_coil() {
    let on = encode_write(1, 0x0012, &WriteValue::Coil(true), 5).unwrap();
    assert_eq!(on, vec![0x01, 0x05, 0x00, 0x12, 0xFF, 0x00]);
    let off = encode_write(1, 0x0012, &WriteValue::Word(0), 5).unwrap();
    assert_eq!(off[4..], [0x00, 0x00]);
}

#[test]
fn test_encode_unsupported_command() {
    assert!(matches!(
        encode_write(1, 0, &WriteValue::Word(1), 0x03),
        Err(SolarError::UnsupportedWriteCommand(0x03))
    ));
    assert!(encode_write(1, 0, &WriteValue::Words(vec![]), 16).is_err());
}

#[test]
fn test_crc_trailer() {
    let mut frame = vec![0x01, 0x06, 0x00, 0x0D, 0x00, 0x01];
    assert_eq!(crc16(&frame), 0xC9D9);
    append_crc(&mut frame);
    assert_eq!(frame[6..], [0xC9, 0xD9]);
}
