//! # Protocol Descriptor
//!
//! A per-model JSON document describing byte order, addressing convention and
//! the register table of one device family. It is parsed and validated once at
//! attach time and is immutable afterwards.
//!
//! ```json
//! {
//!   "endianness": "BE",
//!   "addressing": "register",
//!   "slave_id": 1,
//!   "read_command": 3,
//!   "write_command": 6,
//!   "registers": {
//!     "0x02": { "name": "battery_voltage", "type": "UINT16", "scale": 0.1, "unit": "V" },
//!     "0x07": { "name": "battery_rated_voltage", "type": "UINT16",
//!               "enum": { "0x00": "12V", "0x01": "24V", "0x02": "48V" } }
//!   },
//!   "segments": [ { "start": 0, "count": 64 } ]
//! }
//! ```
//!
//! Register keys are parsed from hex (`0x..`) or decimal once. Keys without a
//! function bucket land in the bucket of `read_command`, so every later lookup
//! works on one canonical key space.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{DEFAULT_READ_COMMAND, DEFAULT_SLAVE_ID, DEFAULT_WRITE_COMMAND};
use crate::error::SolarError;
use crate::register::types::{Endianness, RawValue, RegisterType};
use crate::register::RegisterKey;
use crate::store::LogicalValue;
use crate::util::hex::parse_int_key;

/// How a byte offset inside a frame payload maps to a register key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Addressing {
    /// One key per 16-bit word.
    #[default]
    Register,
    /// One key per byte.
    Byte,
}

/// Entity platform a register is exposed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityClass {
    #[default]
    Sensor,
    Number,
    Select,
    Switch,
    Button,
    Time,
}

impl EntityClass {
    fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "sensor" => Some(EntityClass::Sensor),
            "number" => Some(EntityClass::Number),
            "select" => Some(EntityClass::Select),
            "switch" => Some(EntityClass::Switch),
            "button" => Some(EntityClass::Button),
            "time" => Some(EntityClass::Time),
            _ => None,
        }
    }
}

/// One validated register definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterDef {
    pub key: RegisterKey,
    pub name: String,
    #[serde(rename = "type")]
    pub register_type: RegisterType,
    pub scale: f64,
    pub offset: f64,
    pub unit: Option<String>,
    /// Canonical integer codes to labels.
    #[serde(rename = "enum")]
    pub enum_map: BTreeMap<i64, String>,
    pub write_command: u8,
    /// Byte length, `STRING` only.
    pub length: Option<usize>,
    pub entity_class: EntityClass,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub step: Option<f64>,
    pub icon: Option<String>,
    pub display_precision: Option<u8>,
    /// Fixed value written when the register backs a button.
    pub write_value: Option<i64>,
}

impl RegisterDef {
    pub fn has_enum(&self) -> bool {
        !self.enum_map.is_empty()
    }

    pub fn enum_label(&self, code: i64) -> Option<&str> {
        self.enum_map.get(&code).map(String::as_str)
    }

    /// Code for a label, compared case-insensitively.
    pub fn enum_code(&self, label: &str) -> Option<i64> {
        self.enum_map
            .iter()
            .find(|(_, l)| l.eq_ignore_ascii_case(label))
            .map(|(code, _)| *code)
    }

    /// Bytes this register occupies in a word or byte payload.
    pub fn wire_width(&self) -> Option<usize> {
        match self.register_type {
            RegisterType::String => self.length,
            _ => self.register_type.width(),
        }
    }

    fn is_identity_scale(&self) -> bool {
        self.scale == 1.0 && self.offset == 0.0
    }

    /// Apply scale, offset and enum lookup to a raw value.
    pub fn to_logical(&self, raw: &RawValue) -> LogicalValue {
        match raw {
            RawValue::Text(text) => LogicalValue::Text(text.clone()),
            RawValue::Bit(bit) => LogicalValue::Bool(*bit),
            RawValue::Int(v) if self.has_enum() => {
                let code = (*v as f64 * self.scale).round() as i64;
                LogicalValue::Enum {
                    code,
                    label: self.enum_label(code).map(str::to_string),
                }
            }
            RawValue::Int(v) if self.is_identity_scale() => LogicalValue::Int(*v),
            RawValue::Int(v) => LogicalValue::Float(self.scale_value(*v as f64)),
            RawValue::Float(v) => LogicalValue::Float(f32_precision(*v * self.scale + self.offset)),
        }
    }

    /// `raw * scale + offset`, rounded to the precision the scale implies.
    pub fn scale_value(&self, raw: f64) -> f64 {
        let decimals = decimals_of(self.scale).max(decimals_of(self.offset));
        round_to(raw * self.scale + self.offset, decimals)
    }

    /// Inverse of [`scale_value`](Self::scale_value), rounded to the nearest raw integer.
    pub fn descale(&self, value: f64) -> i64 {
        ((value - self.offset) / self.scale).round() as i64
    }
}

/// Number of fractional digits in the shortest decimal form of `value`.
fn decimals_of(value: f64) -> u32 {
    let text = value.abs().to_string();
    match text.split_once('.') {
        Some((_, frac)) => (frac.trim_end_matches('0').len() as u32).min(6),
        None => 0,
    }
}

/// Shortest decimal form at single precision; FLOAT registers carry no more.
fn f32_precision(value: f64) -> f64 {
    (value as f32).to_string().parse().unwrap_or(value)
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Parsed, validated protocol descriptor.
#[derive(Debug, Clone)]
pub struct ProtocolDescriptor {
    pub endianness: Endianness,
    pub addressing: Addressing,
    pub slave_id: u8,
    pub read_command: u8,
    pub write_command: u8,
    pub append_crc: bool,
    /// Passed through to configuration push, never decoded here.
    pub segments: Vec<Value>,
    registers: BTreeMap<RegisterKey, RegisterDef>,
    names: HashMap<String, RegisterKey>,
}

/// Integers that appear either as JSON numbers or as strings in protocol files.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IntLike {
    Int(i64),
    Text(String),
}

impl IntLike {
    fn to_u8(&self, field: &str) -> Result<u8, SolarError> {
        let value = match self {
            IntLike::Int(v) => Some(*v),
            IntLike::Text(s) => parse_int_key(s),
        };
        value
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| SolarError::DescriptorInvalid(format!("{field} is not a byte: {self:?}")))
    }
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    endianness: Endianness,
    #[serde(default)]
    addressing: Addressing,
    slave_id: Option<IntLike>,
    read_command: Option<IntLike>,
    write_command: Option<IntLike>,
    #[serde(default)]
    append_crc: bool,
    #[serde(default)]
    registers: BTreeMap<String, RawRegister>,
    #[serde(default)]
    segments: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawRegister {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    register_type: RegisterType,
    scale: Option<f64>,
    offset: Option<f64>,
    unit: Option<String>,
    #[serde(rename = "enum", default)]
    enum_map: BTreeMap<String, String>,
    write_command: Option<IntLike>,
    length: Option<usize>,
    sensor_type: Option<String>,
    min_value: Option<f64>,
    max_value: Option<f64>,
    step: Option<f64>,
    icon: Option<String>,
    display_precision: Option<u8>,
    write_value: Option<i64>,
}

impl ProtocolDescriptor {
    pub fn from_json_str(json: &str) -> Result<Self, SolarError> {
        let raw: RawDescriptor = serde_json::from_str(json)
            .map_err(|e| SolarError::DescriptorInvalid(e.to_string()))?;
        Self::from_raw(raw)
    }

    pub fn from_json_value(value: Value) -> Result<Self, SolarError> {
        let raw: RawDescriptor = serde_json::from_value(value)
            .map_err(|e| SolarError::DescriptorInvalid(e.to_string()))?;
        Self::from_raw(raw)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SolarError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loading protocol descriptor from {}", path.as_ref().display());
        Self::from_json_str(&text)
    }

    fn from_raw(raw: RawDescriptor) -> Result<Self, SolarError> {
        let slave_id = match &raw.slave_id {
            Some(v) => v.to_u8("slave_id")?,
            None => DEFAULT_SLAVE_ID,
        };
        let read_command = match &raw.read_command {
            Some(v) => v.to_u8("read_command")?,
            None => DEFAULT_READ_COMMAND,
        };
        let write_command = match &raw.write_command {
            Some(v) => v.to_u8("write_command")?,
            None => DEFAULT_WRITE_COMMAND,
        };

        let mut registers = BTreeMap::new();
        let mut names = HashMap::new();

        for (source_key, reg) in raw.registers {
            let key = parse_register_key(&source_key, read_command)?;
            let def = build_register(key, &source_key, reg, write_command)?;

            if let Some(previous) = names.insert(def.name.clone(), key) {
                return Err(SolarError::DescriptorInvalid(format!(
                    "duplicate register name {:?} at {} and {}",
                    def.name, previous, key
                )));
            }
            if registers.insert(key, def).is_some() {
                return Err(SolarError::DescriptorInvalid(format!(
                    "register {key} defined twice"
                )));
            }
        }

        log::debug!(
            "Protocol descriptor: {} registers, {:?} addressing, {:?}",
            registers.len(),
            raw.addressing,
            raw.endianness
        );

        Ok(ProtocolDescriptor {
            endianness: raw.endianness,
            addressing: raw.addressing,
            slave_id,
            read_command,
            write_command,
            append_crc: raw.append_crc,
            segments: raw.segments,
            registers,
            names,
        })
    }

    /// Key of `address` in this descriptor's read bucket.
    pub fn key(&self, address: u16) -> RegisterKey {
        RegisterKey::new(self.read_command, address)
    }

    /// Put an unbucketed key into the read bucket; bucketed keys pass through.
    pub fn normalize(&self, key: RegisterKey) -> RegisterKey {
        if key.is_unbucketed() {
            key.with_function(self.read_command)
        } else {
            key
        }
    }

    pub fn register(&self, key: RegisterKey) -> Option<&RegisterDef> {
        self.registers.get(&self.normalize(key))
    }

    pub fn by_name(&self, name: &str) -> Option<&RegisterDef> {
        self.names.get(name).and_then(|key| self.registers.get(key))
    }

    pub fn name_of(&self, key: RegisterKey) -> Option<&str> {
        self.register(key).map(|def| def.name.as_str())
    }

    /// Definitions in key order.
    pub fn registers(&self) -> impl Iterator<Item = &RegisterDef> {
        self.registers.values()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

fn parse_register_key(source: &str, read_command: u8) -> Result<RegisterKey, SolarError> {
    let value = parse_int_key(source)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| SolarError::DescriptorInvalid(format!("bad register key {source:?}")))?;
    let key = RegisterKey::from_raw(value);
    if key.is_pseudo() {
        return Err(SolarError::DescriptorInvalid(format!(
            "register key {source} uses reserved bits"
        )));
    }
    Ok(if key.is_unbucketed() {
        key.with_function(read_command)
    } else {
        key
    })
}

fn build_register(
    key: RegisterKey,
    source_key: &str,
    reg: RawRegister,
    default_write: u8,
) -> Result<RegisterDef, SolarError> {
    let name = reg.name.trim().to_string();
    if name.is_empty() {
        return Err(SolarError::DescriptorInvalid(format!(
            "register {source_key} has no name"
        )));
    }

    if reg.register_type == RegisterType::String && reg.length.unwrap_or(0) == 0 {
        return Err(SolarError::DescriptorInvalid(format!(
            "STRING register {name} needs a length"
        )));
    }

    let scale = reg.scale.unwrap_or(1.0);
    if !scale.is_finite() || scale == 0.0 {
        return Err(SolarError::DescriptorInvalid(format!(
            "register {name} has unusable scale {scale}"
        )));
    }

    let mut enum_map = BTreeMap::new();
    for (code, label) in reg.enum_map {
        let parsed = parse_int_key(&code).ok_or_else(|| {
            SolarError::DescriptorInvalid(format!("register {name}: bad enum key {code:?}"))
        })?;
        enum_map.insert(parsed, label);
    }

    let write_command = match &reg.write_command {
        Some(v) => v.to_u8("write_command")?,
        None => default_write,
    };

    let entity_class = match reg.sensor_type.as_deref() {
        None => EntityClass::Sensor,
        Some(tag) => EntityClass::parse(tag).unwrap_or_else(|| {
            log::warn!("Register {name}: unknown sensor_type {tag:?}, using sensor");
            EntityClass::Sensor
        }),
    };

    if let RegisterType::Unknown(tag) = &reg.register_type {
        log::warn!("Register {name} at {key} has unsupported type {tag}");
    }

    Ok(RegisterDef {
        key,
        name,
        register_type: reg.register_type,
        scale,
        offset: reg.offset.unwrap_or(0.0),
        unit: reg.unit,
        enum_map,
        write_command,
        length: reg.length,
        entity_class,
        min_value: reg.min_value,
        max_value: reg.max_value,
        step: reg.step,
        icon: reg.icon,
        display_precision: reg.display_precision,
        write_value: reg.write_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ProtocolDescriptor {
        ProtocolDescriptor::from_json_value(json!({
            "endianness": "BE",
            "slave_id": "1",
            "registers": {
                "0x02": { "name": "battery_voltage", "type": "UINT16", "scale": 0.1, "unit": "V" },
                "0x07": { "name": "battery_rated_voltage", "type": "UINT16",
                          "enum": { "0x00": "12V", "0x01": "24V", "2": "48V" } },
                "0x400010": { "name": "pv_power", "type": "UINT32" },
                "16": { "name": "model_name", "type": "STRING", "length": 8 }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_keys_are_bucketed() {
        let desc = sample();
        assert!(desc.register(RegisterKey::holding(2)).is_some());
        // Unbucketed lookups normalize into the read bucket.
        assert_eq!(desc.name_of(RegisterKey::from_raw(2)), Some("battery_voltage"));
        assert_eq!(desc.name_of(RegisterKey::new(4, 0x10)), Some("pv_power"));
        assert_eq!(desc.name_of(RegisterKey::holding(16)), Some("model_name"));
    }

    #[test]
    fn test_defaults() {
        let desc = sample();
        assert_eq!(desc.slave_id, 1);
        assert_eq!(desc.read_command, 3);
        assert_eq!(desc.write_command, 6);
        assert_eq!(desc.addressing, Addressing::Register);
        let def = desc.by_name("battery_voltage").unwrap();
        assert_eq!(def.write_command, 6);
        assert_eq!(def.entity_class, EntityClass::Sensor);
    }

    #[test]
    fn test_enum_keys_canonical() {
        let desc = sample();
        let def = desc.by_name("battery_rated_voltage").unwrap();
        assert_eq!(def.enum_label(2), Some("48V"));
        assert_eq!(def.enum_code("48v"), Some(2));
    }

    #[test]
    fn test_scaling_rounds_to_scale_precision() {
        let desc = sample();
        let def = desc.by_name("battery_voltage").unwrap();
        assert_eq!(def.to_logical(&RawValue::Int(180)), LogicalValue::Float(18.0));
        assert_eq!(def.to_logical(&RawValue::Int(533)), LogicalValue::Float(53.3));
        assert_eq!(def.descale(53.3), 533);
    }

    #[test]
    fn test_float_keeps_wire_precision() {
        let desc = ProtocolDescriptor::from_json_str(
            r#"{ "registers": {
                "0x2000": { "name": "voltage", "type": "FLOAT" },
                "0x2004": { "name": "active_power", "type": "FLOAT", "scale": 1000 }
            } }"#,
        )
        .unwrap();
        let voltage = desc.by_name("voltage").unwrap();
        assert_eq!(voltage.to_logical(&RawValue::Float(230.5)), LogicalValue::Float(230.5));
        assert_eq!(
            voltage.to_logical(&RawValue::Float(f64::from(0.1f32))),
            LogicalValue::Float(0.1)
        );
        let power = desc.by_name("active_power").unwrap();
        assert_eq!(
            power.to_logical(&RawValue::Float(f64::from(1.234f32))),
            LogicalValue::Float(1234.0)
        );
    }

    #[test]
    fn test_identity_scale_keeps_integers() {
        let desc = sample();
        let def = desc.by_name("pv_power").unwrap();
        assert_eq!(def.to_logical(&RawValue::Int(1200)), LogicalValue::Int(1200));
    }

    #[test]
    fn test_enum_logical_value() {
        let desc = sample();
        let def = desc.by_name("battery_rated_voltage").unwrap();
        assert_eq!(
            def.to_logical(&RawValue::Int(2)),
            LogicalValue::Enum {
                code: 2,
                label: Some("48V".into())
            }
        );
        assert_eq!(
            def.to_logical(&RawValue::Int(9)),
            LogicalValue::Enum { code: 9, label: None }
        );
    }

    #[test]
    fn test_decimals_of() {
        assert_eq!(decimals_of(1.0), 0);
        assert_eq!(decimals_of(0.1), 1);
        assert_eq!(decimals_of(0.01), 2);
        assert_eq!(decimals_of(0.25), 2);
        assert_eq!(decimals_of(10.0), 0);
    }

    #[test]
    fn test_string_without_length_is_invalid() {
        let err = ProtocolDescriptor::from_json_value(json!({
            "registers": { "0x10": { "name": "model", "type": "STRING" } }
        }))
        .unwrap_err();
        assert!(matches!(err, SolarError::DescriptorInvalid(_)));
    }

    #[test]
    fn test_duplicate_names_are_invalid() {
        let err = ProtocolDescriptor::from_json_value(json!({
            "registers": {
                "0x10": { "name": "a", "type": "UINT16" },
                "0x11": { "name": "a", "type": "UINT16" }
            }
        }))
        .unwrap_err();
        assert!(matches!(err, SolarError::DescriptorInvalid(_)));
    }

    #[test]
    fn test_empty_name_is_invalid() {
        let err = ProtocolDescriptor::from_json_value(json!({
            "registers": { "0x10": { "name": "  ", "type": "UINT16" } }
        }))
        .unwrap_err();
        assert!(matches!(err, SolarError::DescriptorInvalid(_)));
    }

    #[test]
    fn test_same_address_twice_is_invalid() {
        // "0x02" and "0x300002" normalize to the same key.
        let err = ProtocolDescriptor::from_json_value(json!({
            "registers": {
                "0x02": { "name": "a" },
                "0x300002": { "name": "b" }
            }
        }))
        .unwrap_err();
        assert!(matches!(err, SolarError::DescriptorInvalid(_)));
    }

    #[test]
    fn test_bad_enum_key_is_invalid() {
        let err = ProtocolDescriptor::from_json_value(json!({
            "registers": { "0x10": { "name": "mode", "enum": { "zero": "Off" } } }
        }))
        .unwrap_err();
        assert!(matches!(err, SolarError::DescriptorInvalid(_)));
    }

    #[test]
    fn test_unknown_type_is_kept() {
        let desc = ProtocolDescriptor::from_json_value(json!({
            "registers": { "0x10": { "name": "odd", "type": "BCD16" } }
        }))
        .unwrap();
        let def = desc.by_name("odd").unwrap();
        assert_eq!(def.register_type, RegisterType::Unknown("BCD16".into()));
        assert_eq!(def.wire_width(), None);
    }
}
