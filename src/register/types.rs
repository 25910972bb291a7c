//! # Register Type Table
//!
//! Static mapping from the type tags used in protocol files (`UINT16`,
//! `INT32`, `FLOAT`, `STRING`, `COIL`, ...) to their wire width and the rule
//! used to decode and encode them.
//!
//! Numeric reads go through `nom`'s endian-aware number parsers. `STRING`
//! takes its width from the register definition, and the bit types are only
//! ever decoded from a packed bitmap by the frame codec, so they have no
//! entry in the width table.

use std::fmt;

use nom::number::complete as num;
use nom::number::Endianness as NomEndianness;
use nom::IResult;
use serde::{Deserialize, Serialize};

/// Byte order of multi-byte fields in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Endianness {
    #[default]
    #[serde(rename = "BE", alias = "be", alias = "big")]
    Big,
    #[serde(rename = "LE", alias = "le", alias = "little")]
    Little,
}

impl Endianness {
    fn nom(self) -> NomEndianness {
        match self {
            Endianness::Big => NomEndianness::Big,
            Endianness::Little => NomEndianness::Little,
        }
    }

    pub fn u16_bytes(self, value: u16) -> [u8; 2] {
        match self {
            Endianness::Big => value.to_be_bytes(),
            Endianness::Little => value.to_le_bytes(),
        }
    }

    pub fn u32_bytes(self, value: u32) -> [u8; 4] {
        match self {
            Endianness::Big => value.to_be_bytes(),
            Endianness::Little => value.to_le_bytes(),
        }
    }

    /// Read a u16 in this byte order.
    pub fn read_u16(self, input: &[u8]) -> IResult<&[u8], u16> {
        num::u16(self.nom())(input)
    }
}

/// Type tag of a register as declared in the protocol descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RegisterType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float,
    String,
    Coil,
    DiscreteInput,
    /// Tag the table does not know; decoding it is a per-register error.
    Unknown(String),
}

/// Why a single register could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDecodeError {
    Truncated { needed: usize, available: usize },
    Unsupported,
}

/// Decoded value of one register before any scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Int(i64),
    Float(f64),
    Bit(bool),
    Text(String),
}

impl RawValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawValue::Int(v) => Some(*v),
            RawValue::Bit(b) => Some(i64::from(*b)),
            RawValue::Float(_) | RawValue::Text(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Int(v) => Some(*v as f64),
            RawValue::Float(v) => Some(*v),
            RawValue::Bit(b) => Some(if *b { 1.0 } else { 0.0 }),
            RawValue::Text(_) => None,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Int(v) => write!(f, "{v}"),
            RawValue::Float(v) => write!(f, "{v}"),
            RawValue::Bit(b) => write!(f, "{}", u8::from(*b)),
            RawValue::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<String> for RegisterType {
    fn from(tag: String) -> Self {
        match tag.trim().to_ascii_uppercase().as_str() {
            "UINT8" => RegisterType::Uint8,
            "INT8" => RegisterType::Int8,
            "UINT16" => RegisterType::Uint16,
            "INT16" => RegisterType::Int16,
            "UINT32" => RegisterType::Uint32,
            "INT32" => RegisterType::Int32,
            "FLOAT" | "FLOAT32" => RegisterType::Float,
            "STRING" => RegisterType::String,
            "COIL" => RegisterType::Coil,
            "DISCRETE_INPUT" => RegisterType::DiscreteInput,
            _ => RegisterType::Unknown(tag),
        }
    }
}

impl From<RegisterType> for String {
    fn from(ty: RegisterType) -> Self {
        ty.tag().to_string()
    }
}

impl Default for RegisterType {
    fn default() -> Self {
        RegisterType::Uint16
    }
}

impl RegisterType {
    pub fn tag(&self) -> &str {
        match self {
            RegisterType::Uint8 => "UINT8",
            RegisterType::Int8 => "INT8",
            RegisterType::Uint16 => "UINT16",
            RegisterType::Int16 => "INT16",
            RegisterType::Uint32 => "UINT32",
            RegisterType::Int32 => "INT32",
            RegisterType::Float => "FLOAT",
            RegisterType::String => "STRING",
            RegisterType::Coil => "COIL",
            RegisterType::DiscreteInput => "DISCRETE_INPUT",
            RegisterType::Unknown(tag) => tag,
        }
    }

    /// Fixed wire width in bytes. `None` for strings, bit types and unknown tags.
    pub fn width(&self) -> Option<usize> {
        match self {
            RegisterType::Uint8 | RegisterType::Int8 => Some(1),
            RegisterType::Uint16 | RegisterType::Int16 => Some(2),
            RegisterType::Uint32 | RegisterType::Int32 | RegisterType::Float => Some(4),
            RegisterType::String
            | RegisterType::Coil
            | RegisterType::DiscreteInput
            | RegisterType::Unknown(_) => None,
        }
    }

    pub fn is_bit(&self) -> bool {
        matches!(self, RegisterType::Coil | RegisterType::DiscreteInput)
    }

    pub fn is_numeric(&self) -> bool {
        self.width().is_some()
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            RegisterType::Int8 | RegisterType::Int16 | RegisterType::Int32 | RegisterType::Float
        )
    }

    /// Decode one value from the front of `input`.
    ///
    /// `string_len` is the declared byte length and is only read for `STRING`.
    /// Extra trailing bytes are ignored.
    pub fn decode(
        &self,
        input: &[u8],
        endianness: Endianness,
        string_len: Option<usize>,
    ) -> Result<RawValue, TypeDecodeError> {
        let needed = match self {
            RegisterType::String => string_len.ok_or(TypeDecodeError::Unsupported)?,
            _ => self.width().ok_or(TypeDecodeError::Unsupported)?,
        };
        if input.len() < needed {
            return Err(TypeDecodeError::Truncated {
                needed,
                available: input.len(),
            });
        }

        let endian = endianness.nom();
        let parsed: IResult<&[u8], RawValue> = match self {
            RegisterType::Uint8 => num::u8(input).map(|(r, v)| (r, RawValue::Int(v.into()))),
            RegisterType::Int8 => num::i8(input).map(|(r, v)| (r, RawValue::Int(v.into()))),
            RegisterType::Uint16 => num::u16(endian)(input).map(|(r, v)| (r, RawValue::Int(v.into()))),
            RegisterType::Int16 => num::i16(endian)(input).map(|(r, v)| (r, RawValue::Int(v.into()))),
            RegisterType::Uint32 => num::u32(endian)(input).map(|(r, v)| (r, RawValue::Int(v.into()))),
            RegisterType::Int32 => num::i32(endian)(input).map(|(r, v)| (r, RawValue::Int(v.into()))),
            RegisterType::Float => num::f32(endian)(input).map(|(r, v)| (r, RawValue::Float(v.into()))),
            RegisterType::String => Ok((&input[needed..], RawValue::Text(decode_ascii(&input[..needed])))),
            RegisterType::Coil | RegisterType::DiscreteInput | RegisterType::Unknown(_) => {
                return Err(TypeDecodeError::Unsupported)
            }
        };

        parsed
            .map(|(_, value)| value)
            .map_err(|_| TypeDecodeError::Truncated {
                needed,
                available: input.len(),
            })
    }

    /// Encode a raw value into this type's wire form.
    ///
    /// Integers wrap to the type's width. `STRING` is NUL padded (or cut) to
    /// `string_len`. Bit types encode as a single `0x00`/`0x01` byte.
    pub fn encode(
        &self,
        value: &RawValue,
        endianness: Endianness,
        string_len: Option<usize>,
    ) -> Option<Vec<u8>> {
        match self {
            RegisterType::String => {
                let RawValue::Text(text) = value else {
                    return None;
                };
                let len = string_len?;
                let mut bytes = text.as_bytes().to_vec();
                bytes.resize(len, 0);
                Some(bytes)
            }
            RegisterType::Coil | RegisterType::DiscreteInput => {
                value.as_i64().map(|v| vec![u8::from(v != 0)])
            }
            RegisterType::Float => {
                let v = value.as_f64()? as f32;
                Some(endianness.u32_bytes(v.to_bits()).to_vec())
            }
            RegisterType::Uint8 | RegisterType::Int8 => Some(vec![value.as_i64()? as u8]),
            RegisterType::Uint16 | RegisterType::Int16 => {
                Some(endianness.u16_bytes(value.as_i64()? as u16).to_vec())
            }
            RegisterType::Uint32 | RegisterType::Int32 => {
                Some(endianness.u32_bytes(value.as_i64()? as u32).to_vec())
            }
            RegisterType::Unknown(_) => None,
        }
    }
}

/// Lossy ASCII decode, trimmed of NUL padding and surrounding whitespace.
fn decode_ascii(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}
