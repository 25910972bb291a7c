//! Inbound frame decoding.
//!
//! Register payloads are scanned one byte at a time rather than one word at a
//! time, because widths inside a frame vary (1, 2 and 4 byte numbers, strings
//! of declared length). Bytes with no register definition are skipped singly.
//! A register that cannot be decoded becomes a diagnostic and never aborts the
//! rest of the frame. Only a buffer shorter than the header is a whole-frame
//! error.

use std::collections::BTreeMap;

use crate::constants::{ADDRESS_MASK, FRAME_HEADER_LEN};
use crate::error::SolarError;
use crate::frame::{parse_header, FrameHeader, FunctionCode};
use crate::register::types::TypeDecodeError;
use crate::register::{Addressing, ProtocolDescriptor, RawValue, RegisterKey};
use crate::util::logging::log_frame_hex;

/// Result of decoding one frame.
#[derive(Debug)]
pub struct DecodedFrame {
    pub header: FrameHeader,
    /// Raw values keyed by canonical register key.
    pub registers: BTreeMap<RegisterKey, RawValue>,
    /// Per-register failures; the frame was still decoded around them.
    pub diagnostics: Vec<SolarError>,
}

impl DecodedFrame {
    fn new(header: FrameHeader) -> Self {
        DecodedFrame {
            header,
            registers: BTreeMap::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn get(&self, key: RegisterKey) -> Option<&RawValue> {
        self.registers.get(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// True when the scan ran to the end of the payload without a truncation.
    pub fn is_complete(&self) -> bool {
        !self
            .diagnostics
            .iter()
            .any(|d| matches!(d, SolarError::TruncatedPayload { .. }))
    }
}

/// Decode one inbound frame against a protocol descriptor.
///
/// ```rust
/// use solar_modbus::frame::decode_frame;
/// use solar_modbus::register::{ProtocolDescriptor, RawValue, RegisterKey};
///
/// let descriptor = ProtocolDescriptor::from_json_str(r#"{
///     "registers": { "0x02": { "name": "battery_voltage", "type": "UINT16", "scale": 0.1 } }
/// }"#).unwrap();
///
/// let frame = decode_frame(&[0x01, 0x03, 0x00, 0x02, 0x00, 0x01, 0x00, 0xB4], &descriptor).unwrap();
/// assert_eq!(frame.get(RegisterKey::holding(2)), Some(&RawValue::Int(180)));
/// ```
pub fn decode_frame(
    data: &[u8],
    descriptor: &ProtocolDescriptor,
) -> Result<DecodedFrame, SolarError> {
    if data.len() < FRAME_HEADER_LEN {
        log::error!("Frame too short: {} bytes", data.len());
        return Err(SolarError::FrameTooShort {
            len: data.len(),
            needed: FRAME_HEADER_LEN,
        });
    }

    let (payload, header) =
        parse_header(data, descriptor.endianness).map_err(|_| SolarError::FrameTooShort {
            len: data.len(),
            needed: FRAME_HEADER_LEN,
        })?;

    log_frame_hex("decode", data);

    if FunctionCode::is_exception(header.function_code) {
        log::warn!(
            "Exception response 0x{:02X} from slave {}",
            header.function_code,
            header.slave_id
        );
    }

    let bytes_per_element = match descriptor.addressing {
        Addressing::Register => 2,
        Addressing::Byte => 1,
    };
    let expected = header.expected_payload_len(bytes_per_element);
    if payload.len() != expected {
        log::warn!(
            "Payload length {} does not match count {} (expected {} bytes)",
            payload.len(),
            header.count,
            expected
        );
    }

    let mut frame = DecodedFrame::new(header);
    if FunctionCode::from_u8(header.function_code).is_bit_read() {
        decode_bits(&mut frame, payload, descriptor);
    } else {
        decode_registers(&mut frame, payload, descriptor);
    }

    for diagnostic in &frame.diagnostics {
        log::warn!("Frame diagnostic: {diagnostic}");
    }
    log::debug!(
        "Decoded {} registers from fc 0x{:02X} start 0x{:04X}",
        frame.registers.len(),
        header.function_code,
        header.start_address
    );

    Ok(frame)
}

/// Key for `start + index`, or `None` once the 16-bit address space ends.
fn element_key(header: &FrameHeader, index: usize) -> Option<RegisterKey> {
    let address = header.start_address as usize + index;
    if address > ADDRESS_MASK as usize {
        return None;
    }
    Some(RegisterKey::new(header.function_code, address as u16))
}

/// Packed bitmap: element `i` is bit `i % 8` of byte `i / 8`.
fn decode_bits(frame: &mut DecodedFrame, payload: &[u8], descriptor: &ProtocolDescriptor) {
    let header = frame.header;
    for i in 0..header.count as usize {
        let Some(key) = element_key(&header, i) else {
            break;
        };
        if descriptor.register(key).is_none() {
            continue;
        }
        let Some(byte) = payload.get(i / 8) else {
            frame.diagnostics.push(SolarError::TruncatedPayload {
                key,
                needed: i / 8 + 1,
                available: payload.len(),
            });
            break;
        };
        let bit = (byte >> (i % 8)) & 0x01 == 1;
        frame.registers.insert(key, RawValue::Bit(bit));
    }
}

fn decode_registers(frame: &mut DecodedFrame, payload: &[u8], descriptor: &ProtocolDescriptor) {
    let header = frame.header;
    let mut offset = 0usize;
    let mut last_key: Option<RegisterKey> = None;

    while offset < payload.len() {
        let index = match descriptor.addressing {
            Addressing::Register => offset / 2,
            Addressing::Byte => offset,
        };
        let Some(key) = element_key(&header, index) else {
            break;
        };

        // The trailing byte of a word must not decode the same key again.
        if last_key == Some(key) {
            offset += 1;
            continue;
        }

        let Some(def) = descriptor.register(key) else {
            offset += 1;
            continue;
        };

        let decoded = def.register_type.decode(
            &payload[offset..],
            descriptor.endianness,
            def.length,
        );
        last_key = Some(key);

        match decoded {
            Ok(value) => {
                log::trace!("{} ({}) = {}", key, def.name, value);
                frame.registers.insert(key, value);
                offset += def.wire_width().unwrap_or(1);
            }
            Err(TypeDecodeError::Truncated { needed, available }) => {
                frame.diagnostics.push(SolarError::TruncatedPayload {
                    key,
                    needed,
                    available,
                });
                break;
            }
            Err(TypeDecodeError::Unsupported) => {
                frame.diagnostics.push(SolarError::UnsupportedType {
                    key,
                    tag: def.register_type.tag().to_string(),
                });
                offset += 1;
            }
        }
    }
}
