//! # Frame Codec
//!
//! Stateless conversion between wire frames and register values.
//!
//! Inbound frames carry a fixed header followed by the payload:
//!
//! ```text
//! [slave_id:1][function_code:1][start_address:2][count:2][payload...]
//! ```
//!
//! Start address and count use the descriptor's byte order. Outbound writes
//! are `[slave_id:1][write_command:1][address:2][payload]`, optionally followed
//! by a CRC-16/MODBUS trailer.
//!
//! Nothing here holds state, so frames for different devices can be decoded
//! concurrently without synchronization.

pub mod decode;
pub mod encode;
pub mod function_code;

use nom::number::complete::be_u8;
use nom::IResult;
use serde::Serialize;

use crate::register::Endianness;

pub use decode::{decode_frame, DecodedFrame};
pub use encode::{append_crc, crc16, encode_for_descriptor, encode_write, WriteValue};
pub use function_code::FunctionCode;

/// Fixed six-byte inbound frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameHeader {
    pub slave_id: u8,
    pub function_code: u8,
    pub start_address: u16,
    pub count: u16,
}

impl FrameHeader {
    /// Payload length the header announces for the given addressing.
    pub fn expected_payload_len(&self, bytes_per_element: usize) -> usize {
        if FunctionCode::from_u8(self.function_code).is_bit_read() {
            (self.count as usize).div_ceil(8)
        } else {
            self.count as usize * bytes_per_element
        }
    }
}

/// Uses `nom` to read the header; the remaining input is the payload.
pub fn parse_header(input: &[u8], endianness: Endianness) -> IResult<&[u8], FrameHeader> {
    let (input, slave_id) = be_u8(input)?;
    let (input, function_code) = be_u8(input)?;
    let (input, start_address) = endianness.read_u16(input)?;
    let (input, count) = endianness.read_u16(input)?;
    Ok((
        input,
        FrameHeader {
            slave_id,
            function_code,
            start_address,
            count,
        },
    ))
}
