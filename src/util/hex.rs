//! # Hex Utilities
//!
//! Hex helpers shared by the descriptor loader (register and enum keys are
//! written as `"0x6E"` or `"110"` in protocol files), the CLI (frames are
//! pasted as hex) and frame logging.
//!
//! ```rust
//! use solar_modbus::util::hex::{decode_hex, format_hex_compact, parse_int_key};
//!
//! let frame = decode_hex("01 03 00 02 00 01 00 B4").unwrap();
//! assert_eq!(format_hex_compact(&frame[..2]), "01 03");
//! assert_eq!(parse_int_key("0x6E"), Some(110));
//! assert_eq!(parse_int_key("110"), Some(110));
//! ```

use thiserror::Error;

/// Errors that can occur during hex operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to uppercase hex string
pub fn encode_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode hex string to bytes
///
/// Accepts both uppercase and lowercase hex characters.
/// Whitespace is automatically stripped.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.is_empty() {
        return Err(HexError::EmptyString);
    }

    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Format hex data for compact display (useful for logs)
///
/// Formats data as "01 03 00 02" with spaces between bytes.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse hex string that may contain spaces or other separators
///
/// More lenient than decode_hex, strips all non-hex characters.
pub fn parse_hex_lenient(input: &str) -> Result<Vec<u8>, HexError> {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let hex_chars: String = body.chars().filter(|c| c.is_ascii_hexdigit()).collect();

    if hex_chars.is_empty() {
        return Err(HexError::EmptyString);
    }

    if hex_chars.len() % 2 != 0 {
        return Err(HexError::OddLength(hex_chars.len()));
    }

    hex::decode(&hex_chars).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Parse an integer key in either `0x`-prefixed hex or decimal form.
///
/// A leading `-` is accepted for decimal keys only.
pub fn parse_int_key(key: &str) -> Option<i64> {
    let key = key.trim();
    if let Some(hex) = key.strip_prefix("0x").or_else(|| key.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    key.parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_with_whitespace() {
        let hex = "01 03 00 02";
        assert_eq!(decode_hex(hex).unwrap(), vec![0x01, 0x03, 0x00, 0x02]);
    }

    #[test]
    fn test_encode_upper() {
        assert_eq!(encode_hex_upper(&[0xab, 0x01]), "AB01");
    }

    #[test]
    fn test_format_compact() {
        assert_eq!(format_hex_compact(&[0x01, 0x06, 0x00, 0x20]), "01 06 00 20");
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(
            parse_hex_lenient("0x01-03:00 02").unwrap(),
            vec![0x01, 0x03, 0x00, 0x02]
        );
    }

    #[test]
    fn test_parse_int_key() {
        assert_eq!(parse_int_key("0x300007"), Some(0x300007));
        assert_eq!(parse_int_key("0X6e"), Some(0x6E));
        assert_eq!(parse_int_key(" 12 "), Some(12));
        assert_eq!(parse_int_key("-3"), Some(-3));
        assert_eq!(parse_int_key("0xZZ"), None);
        assert_eq!(parse_int_key("twelve"), None);
    }

    #[test]
    fn test_errors() {
        assert_eq!(decode_hex(""), Err(HexError::EmptyString));
        assert_eq!(decode_hex("1"), Err(HexError::OddLength(1)));
        assert!(decode_hex("GG").is_err());
    }
}
