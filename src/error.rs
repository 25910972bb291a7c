//! # Error Handling
//!
//! This module defines the SolarError enum, which represents the different error
//! types that can occur while decoding frames, encoding commands, loading
//! protocol descriptors or driving attached devices.

use thiserror::Error;

use crate::register::RegisterKey;
use crate::util::hex::HexError;

/// Represents the different error types that can occur in the crate.
#[derive(Debug, Error)]
pub enum SolarError {
    /// The buffer does not even hold the fixed frame header.
    #[error("Frame too short: {len} bytes, header needs {needed}")]
    FrameTooShort { len: usize, needed: usize },

    /// A register declares a type tag the type table cannot decode.
    #[error("Unsupported register type {tag} at {key}")]
    UnsupportedType { key: RegisterKey, tag: String },

    /// Outbound write with a function code the encoder does not implement.
    #[error("Unsupported write command: {0}")]
    UnsupportedWriteCommand(u8),

    /// A bit-packed sub-field decoded outside its valid range.
    #[error("{field} out of range: {value} (expected {min}..={max})")]
    FieldOutOfRange {
        field: String,
        value: i64,
        min: i64,
        max: i64,
    },

    /// Address present in a frame or command with no register definition.
    #[error("Unknown register {0}")]
    UnknownRegister(RegisterKey),

    /// Logical name with no register definition.
    #[error("Unknown register name: {0}")]
    UnknownName(String),

    /// The payload ended before a register's declared width.
    #[error("Truncated payload at {key}: needed {needed} bytes, {available} available")]
    TruncatedPayload {
        key: RegisterKey,
        needed: usize,
        available: usize,
    },

    /// The protocol descriptor is unusable (fatal at load time).
    #[error("Invalid protocol descriptor: {0}")]
    DescriptorInvalid(String),

    /// A command value does not fit the target register.
    #[error("Invalid value for {target}: {reason}")]
    InvalidValue { target: String, reason: String },

    /// No device attached under this serial.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// No plugin registered for this model name.
    #[error("Unknown device model: {0}")]
    UnknownModel(String),

    /// The injected transport failed to deliver a frame.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Hex error: {0}")]
    Hex(#[from] HexError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all error for uncategorized cases.
    #[error("Other error: {0}")]
    Other(String),
}

impl SolarError {
    /// Shorthand for a range violation on a named sub-field.
    pub fn out_of_range(field: impl Into<String>, value: i64, min: i64, max: i64) -> Self {
        SolarError::FieldOutOfRange {
            field: field.into(),
            value,
            min,
            max,
        }
    }

    pub fn invalid_value(target: impl ToString, reason: impl Into<String>) -> Self {
        SolarError::InvalidValue {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors that only invalidate a single field of a frame.
    pub fn is_field_level(&self) -> bool {
        matches!(
            self,
            SolarError::UnsupportedType { .. }
                | SolarError::FieldOutOfRange { .. }
                | SolarError::UnknownRegister(_)
                | SolarError::TruncatedPayload { .. }
                | SolarError::InvalidValue { .. }
        )
    }
}
