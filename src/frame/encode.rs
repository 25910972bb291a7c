//! Outbound write encoding.
//!
//! Supported write commands:
//!
//! | fc   | payload                                           |
//! |------|---------------------------------------------------|
//! | 0x05 | `0xFF00` (on) or `0x0000` (off)                   |
//! | 0x06 | one 16-bit value, masked                          |
//! | 0x10 | `[quantity:2][byte_count:1][word:2]...`           |
//!
//! Address and payload are big-endian on the wire. Values must already be
//! scaled; scale is a logical-layer concern.

use bytes::{BufMut, BytesMut};
use crc::{Crc, CRC_16_MODBUS};

use crate::constants::{
    COIL_OFF, COIL_ON, FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL,
    FC_WRITE_SINGLE_REGISTER, MAX_WRITE_REGISTERS,
};
use crate::error::SolarError;
use crate::register::ProtocolDescriptor;
use crate::util::logging::log_frame_hex;

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Value carried by one write command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteValue {
    /// Integer for a single register; masked to 16 bits.
    Word(i64),
    /// Sequence for function 16.
    Words(Vec<u16>),
    Coil(bool),
}

/// Build `[slave_id][write_command][address:2][payload]`.
///
/// An unsupported command, or a value that does not fit it, fails this one
/// write and produces no bytes.
pub fn encode_write(
    slave_id: u8,
    address: u16,
    value: &WriteValue,
    write_command: u8,
) -> Result<Vec<u8>, SolarError> {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_u8(slave_id);
    buf.put_u8(write_command);
    buf.put_u16(address);

    match write_command {
        FC_WRITE_SINGLE_COIL => {
            let on = match value {
                WriteValue::Coil(on) => *on,
                WriteValue::Word(v) => *v != 0,
                WriteValue::Words(_) => {
                    return Err(reject(address, "coil write needs a boolean"));
                }
            };
            buf.put_u16(if on { COIL_ON } else { COIL_OFF });
        }
        FC_WRITE_SINGLE_REGISTER => {
            let word = match value {
                WriteValue::Word(v) => (*v & 0xFFFF) as u16,
                WriteValue::Coil(on) => u16::from(*on),
                WriteValue::Words(words) if words.len() == 1 => words[0],
                WriteValue::Words(words) => {
                    return Err(reject(
                        address,
                        &format!("single register write got {} words", words.len()),
                    ));
                }
            };
            buf.put_u16(word);
        }
        FC_WRITE_MULTIPLE_REGISTERS => {
            let words = match value {
                WriteValue::Words(words) => words.clone(),
                WriteValue::Word(v) => vec![(*v & 0xFFFF) as u16],
                WriteValue::Coil(_) => {
                    return Err(reject(address, "multiple register write needs words"));
                }
            };
            if words.is_empty() || words.len() > MAX_WRITE_REGISTERS {
                return Err(reject(
                    address,
                    &format!("{} words (1..={MAX_WRITE_REGISTERS})", words.len()),
                ));
            }
            buf.put_u16(words.len() as u16);
            buf.put_u8((words.len() * 2) as u8);
            for word in words {
                buf.put_u16(word);
            }
        }
        other => {
            log::error!("Unsupported write command 0x{other:02X} for address 0x{address:04X}");
            return Err(SolarError::UnsupportedWriteCommand(other));
        }
    }

    log_frame_hex("encode", &buf);
    Ok(buf.to_vec())
}

fn reject(address: u16, reason: &str) -> SolarError {
    log::error!("Rejected write to 0x{address:04X}: {reason}");
    SolarError::invalid_value(format!("0x{address:04X}"), reason)
}

/// CRC-16/MODBUS of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Append the CRC trailer, high byte first.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_be_bytes());
}

/// [`encode_write`] plus the descriptor's CRC setting.
pub fn encode_for_descriptor(
    descriptor: &ProtocolDescriptor,
    slave_id: u8,
    address: u16,
    value: &WriteValue,
    write_command: u8,
) -> Result<Vec<u8>, SolarError> {
    let mut frame = encode_write(slave_id, address, value, write_command)?;
    if descriptor.append_crc {
        append_crc(&mut frame);
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_register() {
        let frame = encode_write(1, 0x0008, &WriteValue::Word(470), 6).unwrap();
        assert_eq!(frame, vec![0x01, 0x06, 0x00, 0x08, 0x01, 0xD6]);
    }

    #[test]
    fn test_single_register_masks_to_16_bits() {
        let frame = encode_write(1, 0x0002, &WriteValue::Word(0x1_0005), 6).unwrap();
        assert_eq!(&frame[4..], &[0x00, 0x05]);
        let frame = encode_write(1, 0x0002, &WriteValue::Word(-1), 6).unwrap();
        assert_eq!(&frame[4..], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_coil() {
        assert_eq!(
            encode_write(2, 0x0010, &WriteValue::Coil(true), 5).unwrap(),
            vec![0x02, 0x05, 0x00, 0x10, 0xFF, 0x00]
        );
        assert_eq!(
            encode_write(2, 0x0010, &WriteValue::Word(0), 5).unwrap(),
            vec![0x02, 0x05, 0x00, 0x10, 0x00, 0x00]
        );
    }

    #[test]
    fn test_multiple_registers() {
        let frame = encode_write(1, 0x001E, &WriteValue::Words(vec![0x0A12, 0x3456]), 0x10).unwrap();
        assert_eq!(
            frame,
            vec![0x01, 0x10, 0x00, 0x1E, 0x00, 0x02, 0x04, 0x0A, 0x12, 0x34, 0x56]
        );
    }

    #[test]
    fn test_multiple_registers_bounds() {
        assert!(encode_write(1, 0, &WriteValue::Words(vec![]), 0x10).is_err());
        assert!(encode_write(1, 0, &WriteValue::Words(vec![0; 124]), 0x10).is_err());
    }

    #[test]
    fn test_unsupported_command() {
        let err = encode_write(1, 0x0002, &WriteValue::Word(1), 0x2B).unwrap_err();
        assert!(matches!(err, SolarError::UnsupportedWriteCommand(0x2B)));
    }

    #[test]
    fn test_crc_check_value() {
        // CRC-16/MODBUS check value
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_append_crc_high_byte_first() {
        let mut frame = vec![0x01, 0x06, 0x00, 0x01, 0x00, 0x03];
        let crc = crc16(&frame);
        append_crc(&mut frame);
        assert_eq!(frame.len(), 8);
        assert_eq!(frame[6], (crc >> 8) as u8);
        assert_eq!(frame[7], (crc & 0xFF) as u8);
    }
}
