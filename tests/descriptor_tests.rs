//! Loading and validating protocol descriptors.

use std::io::Write;

use solar_modbus::register::{Addressing, EntityClass, ProtocolDescriptor, RegisterKey, RegisterType};
use solar_modbus::{PluginRegistry, SolarError};
use tempfile::NamedTempFile;

fn write_temp(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

#[test]
fn test_every_registered_model_has_a_loadable_protocol() {
    let registry = PluginRegistry::with_defaults().unwrap();
    for model in registry.models() {
        let id = registry.protocol_for(&model).unwrap();
        let path = format!("{}/protocols/{id}.json", env!("CARGO_MANIFEST_DIR"));
        let desc = ProtocolDescriptor::from_file(&path)
            .unwrap_or_else(|e| panic!("{model}: {path}: {e}"));
        assert!(!desc.is_empty(), "{model} has no registers");
        assert!(desc.append_crc, "{model} frames need a CRC");
    }
}

#[test]
fn test_load_from_file() {
    let file = write_temp(
        r#"{
            "endianness": "LE",
            "addressing": "byte",
            "slave_id": "0x0F",
            "write_command": 16,
            "registers": {
                "0x10": { "name": "cell_count", "type": "UINT8" },
                "0x20": { "name": "charge_switch", "type": "UINT32", "sensor_type": "switch" },
                "0x50": { "name": "model", "type": "STRING", "length": 8 }
            }
        }"#,
    );
    let desc = ProtocolDescriptor::from_file(file.path()).unwrap();
    assert_eq!(desc.addressing, Addressing::Byte);
    assert_eq!(desc.slave_id, 15);
    assert_eq!(desc.len(), 3);

    let switch = desc.by_name("charge_switch").unwrap();
    assert_eq!(switch.key, RegisterKey::holding(0x20));
    assert_eq!(switch.entity_class, EntityClass::Switch);
    assert_eq!(switch.write_command, 16);
    assert_eq!(desc.by_name("model").unwrap().register_type, RegisterType::String);
}

#[test]
fn test_missing_file() {
    let result = ProtocolDescriptor::from_file("/nonexistent/protocol.json");
    assert!(matches!(result, Err(SolarError::Io(_))));
}

#[test]
fn test_malformed_json() {
    let file = write_temp("{ \"registers\": ");
    assert!(matches!(
        ProtocolDescriptor::from_file(file.path()),
        Err(SolarError::DescriptorInvalid(_))
    ));
}

#[test]
fn test_invalid_registers_rejected() {
    let cases = [
        r#"{ "registers": { "0x01": { "type": "UINT16" } } }"#,
        r#"{ "registers": { "0x01": { "name": "a" }, "0x02": { "name": "a" } } }"#,
        r#"{ "registers": { "0x01": { "name": "s", "type": "STRING" } } }"#,
        r#"{ "registers": { "0x01": { "name": "z", "scale": 0 } } }"#,
        r#"{ "registers": { "bogus": { "name": "b" } } }"#,
        r#"{ "registers": { "0x10020": { "name": "pseudo" } } }"#,
        r#"{ "slave_id": 300 }"#,
    ];
    for json in cases {
        assert!(
            matches!(ProtocolDescriptor::from_json_str(json), Err(SolarError::DescriptorInvalid(_))),
            "accepted {json}"
        );
    }
}

#[test]
fn test_unknown_type_loads_but_is_flagged() {
    let desc = ProtocolDescriptor::from_json_str(
        r#"{ "registers": { "0x01": { "name": "odd", "type": "INT64" } } }"#,
    )
    .unwrap();
    let def = desc.by_name("odd").unwrap();
    assert_eq!(def.register_type, RegisterType::Unknown("INT64".into()));
    assert_eq!(def.wire_width(), None);
}

#[test]
fn test_hex_and_decimal_keys_are_equivalent() {
    let hex = ProtocolDescriptor::from_json_str(r#"{ "registers": { "0x6E": { "name": "pf" } } }"#).unwrap();
    let dec = ProtocolDescriptor::from_json_str(r#"{ "registers": { "110": { "name": "pf" } } }"#).unwrap();
    assert_eq!(hex.by_name("pf").unwrap().key, dec.by_name("pf").unwrap().key);
}
