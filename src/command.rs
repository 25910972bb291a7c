//! Outbound commands: what a collaborator asks for, and the plan that turns it
//! into one wire frame plus an optimistic store update.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::constants::{FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL};
use crate::error::SolarError;
use crate::frame::WriteValue;
use crate::register::{Endianness, RawValue, RegisterDef, RegisterKey, RegisterType};
use crate::store::{Bounds, StoreUpdate};
use crate::transform::parse_clock;
use crate::util::hex::parse_int_key;

/// Semantic value of a command, before scaling.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Enum label or free text.
    Text(String),
    Time { hour: u8, minute: u8 },
    /// Both bytes of a byte-pair register.
    Pair { high: u8, low: u8 },
    /// Raw words for function 16, sent unscaled.
    Words(Vec<u16>),
}

impl CommandValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CommandValue::Int(v) => Some(*v as f64),
            CommandValue::Float(v) => Some(*v),
            CommandValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Whole-number value, accepting floats with no fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CommandValue::Int(v) => Some(*v),
            CommandValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            CommandValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, SolarError> {
        let invalid = || SolarError::invalid_value("command", format!("unsupported JSON {value}"));
        match value {
            Value::Bool(b) => Ok(CommandValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(v) => Ok(CommandValue::Int(v)),
                None => n.as_f64().map(CommandValue::Float).ok_or_else(invalid),
            },
            Value::String(s) => s.parse(),
            Value::Object(map) => {
                let byte = |field: &str| {
                    map.get(field)
                        .and_then(Value::as_u64)
                        .and_then(|v| u8::try_from(v).ok())
                };
                match (byte("high"), byte("low")) {
                    (Some(high), Some(low)) => Ok(CommandValue::Pair { high, low }),
                    _ => Err(invalid()),
                }
            }
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_u64().and_then(|w| u16::try_from(w).ok()))
                .collect::<Option<Vec<u16>>>()
                .map(CommandValue::Words)
                .ok_or_else(invalid),
            Value::Null => Err(invalid()),
        }
    }
}

impl FromStr for CommandValue {
    type Err = SolarError;

    /// `true`/`false`, `HH:MM`, integers (decimal or `0x..`), floats, else text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        match text.to_ascii_lowercase().as_str() {
            "true" | "on" => return Ok(CommandValue::Bool(true)),
            "false" | "off" => return Ok(CommandValue::Bool(false)),
            _ => {}
        }
        if text.contains(':') {
            let (hour, minute) = parse_clock(text)?;
            return Ok(CommandValue::Time { hour, minute });
        }
        if let Some(v) = parse_int_key(text) {
            return Ok(CommandValue::Int(v));
        }
        if let Ok(v) = text.parse::<f64>() {
            return Ok(CommandValue::Float(v));
        }
        Ok(CommandValue::Text(text.to_string()))
    }
}

impl From<i64> for CommandValue {
    fn from(v: i64) -> Self {
        CommandValue::Int(v)
    }
}

impl From<f64> for CommandValue {
    fn from(v: f64) -> Self {
        CommandValue::Float(v)
    }
}

impl From<bool> for CommandValue {
    fn from(v: bool) -> Self {
        CommandValue::Bool(v)
    }
}

impl From<&str> for CommandValue {
    fn from(v: &str) -> Self {
        CommandValue::Text(v.to_string())
    }
}

/// Where a command goes: a logical name or a register key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTarget {
    Name(String),
    Key(RegisterKey),
}

impl fmt::Display for WriteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteTarget::Name(name) => f.write_str(name),
            WriteTarget::Key(key) => write!(f, "{key}"),
        }
    }
}

impl From<&str> for WriteTarget {
    /// Numeric strings are keys, anything else is a name.
    fn from(s: &str) -> Self {
        match parse_int_key(s).and_then(|v| u32::try_from(v).ok()) {
            Some(raw) => WriteTarget::Key(RegisterKey::from_raw(raw)),
            None => WriteTarget::Name(s.to_string()),
        }
    }
}

impl From<String> for WriteTarget {
    fn from(s: String) -> Self {
        WriteTarget::from(s.as_str())
    }
}

impl From<RegisterKey> for WriteTarget {
    fn from(key: RegisterKey) -> Self {
        WriteTarget::Key(key)
    }
}

/// One write, ready to encode, and the store update it implies.
#[derive(Debug, Clone)]
pub struct WritePlan {
    /// Real wire register (never a pseudo key).
    pub key: RegisterKey,
    pub value: WriteValue,
    pub write_command: u8,
    /// Applied only once the frame was encoded.
    pub update: StoreUpdate,
}

impl WritePlan {
    pub fn single(key: RegisterKey, word: u16, write_command: u8) -> Self {
        WritePlan {
            key,
            value: WriteValue::Word(word.into()),
            write_command,
            update: StoreUpdate::default(),
        }
    }
}

/// Plan a plain register write: label lookup, range check, descale, optimistic value.
pub fn generic_plan(
    def: &RegisterDef,
    value: &CommandValue,
    endianness: Endianness,
    bounds: Option<Bounds>,
) -> Result<WritePlan, SolarError> {
    let target = &def.name;
    let mut update = StoreUpdate::default();

    if let CommandValue::Words(words) = value {
        return Ok(WritePlan {
            key: def.key,
            value: WriteValue::Words(words.clone()),
            write_command: FC_WRITE_MULTIPLE_REGISTERS,
            update,
        });
    }

    let logical = match value {
        CommandValue::Text(label) if def.has_enum() => def
            .enum_code(label)
            .map(|code| code as f64)
            .ok_or_else(|| SolarError::invalid_value(target, format!("unknown option {label:?}")))?,
        CommandValue::Int(code) if def.has_enum() && def.enum_label(*code).is_none() => {
            return Err(SolarError::invalid_value(target, format!("unknown option {code}")));
        }
        other => other.as_f64().ok_or_else(|| {
            SolarError::invalid_value(target, format!("{other:?} is not a number"))
        })?,
    };

    let range = bounds.or(match (def.min_value, def.max_value) {
        (Some(min), Some(max)) => Some(Bounds::new(min, max)),
        _ => None,
    });
    if let Some(range) = range {
        if !range.contains(logical) {
            return Err(SolarError::invalid_value(
                target,
                format!("{logical} outside {}..={}", range.min, range.max),
            ));
        }
    }

    let raw = match def.register_type {
        RegisterType::Float => RawValue::Float((logical - def.offset) / def.scale),
        RegisterType::Coil | RegisterType::DiscreteInput => RawValue::Bit(logical != 0.0),
        _ => RawValue::Int(def.descale(logical)),
    };

    // A float spans two registers; one word cannot carry it.
    let write_command = match def.register_type {
        RegisterType::Float if def.write_command != FC_WRITE_SINGLE_COIL => FC_WRITE_MULTIPLE_REGISTERS,
        _ => def.write_command,
    };

    let wire = match (write_command, &raw) {
        (FC_WRITE_SINGLE_COIL, _) => WriteValue::Coil(logical != 0.0),
        (FC_WRITE_MULTIPLE_REGISTERS, _) => WriteValue::Words(words_for(def, &raw, endianness)?),
        (_, RawValue::Int(word)) => WriteValue::Word(*word),
        (_, other) => {
            return Err(SolarError::invalid_value(
                target,
                format!("{other} does not fit a single register write"),
            ));
        }
    };

    update.set(target.clone(), def.to_logical(&raw));
    Ok(WritePlan {
        key: def.key,
        value: wire,
        write_command,
        update,
    })
}

/// Register words for a function 16 write, in the descriptor's byte order.
fn words_for(def: &RegisterDef, raw: &RawValue, endianness: Endianness) -> Result<Vec<u16>, SolarError> {
    let bytes = match def.register_type.width() {
        Some(4) => def.register_type.encode(raw, endianness, None),
        _ => raw
            .as_i64()
            .map(|v| endianness.u16_bytes((v & 0xFFFF) as u16).to_vec()),
    }
    .ok_or_else(|| SolarError::invalid_value(&def.name, "value does not fit the register"))?;

    Ok(bytes
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [single] => u16::from(*single),
            _ => 0,
        })
        .collect())
}
