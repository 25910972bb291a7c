//! # Utility Modules
//!
//! Hex encoding/decoding and rate-limited frame logging used throughout the
//! codec and device layers.

pub mod hex;
pub mod logging;

pub use hex::{decode_hex, encode_hex_upper, format_hex_compact, parse_hex_lenient, parse_int_key};
pub use logging::{log_frame_hex, LogThrottle};
