#![no_main]

use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;
use solar_modbus::frame::decode_frame;
use solar_modbus::register::ProtocolDescriptor;

static REGISTER_MODE: Lazy<ProtocolDescriptor> = Lazy::new(|| {
    ProtocolDescriptor::from_json_str(
        r#"{
            "registers": {
                "0x00": { "name": "u8", "type": "UINT8" },
                "0x01": { "name": "i16", "type": "INT16", "scale": 0.1 },
                "0x02": { "name": "u32", "type": "UINT32" },
                "0x04": { "name": "f32", "type": "FLOAT" },
                "0x06": { "name": "text", "type": "STRING", "length": 6 },
                "0x09": { "name": "odd", "type": "INT64" },
                "0x100000": { "name": "coil", "type": "COIL" }
            }
        }"#,
    )
    .unwrap()
});

static BYTE_MODE: Lazy<ProtocolDescriptor> = Lazy::new(|| {
    ProtocolDescriptor::from_json_str(
        r#"{
            "addressing": "byte",
            "endianness": "LE",
            "registers": {
                "0x00": { "name": "u8", "type": "UINT8" },
                "0x01": { "name": "u16", "type": "UINT16" },
                "0x03": { "name": "i32", "type": "INT32" },
                "0x07": { "name": "text", "type": "STRING", "length": 3 }
            }
        }"#,
    )
    .unwrap()
});

fuzz_target!(|data: &[u8]| {
    // Must never panic, whatever the header claims.
    let _ = decode_frame(data, &REGISTER_MODE);
    let _ = decode_frame(data, &BYTE_MODE);
});
