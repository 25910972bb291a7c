//! Protocol Constants
//!
//! This module defines the constants shared by the frame codec, the register
//! store and the device plugins.

use std::time::Duration;

/// Size of the fixed inbound frame header: slave, function, start, count.
pub const FRAME_HEADER_LEN: usize = 6;

/// Function codes are shifted into bits 20.. of a register key.
pub const FUNCTION_BUCKET_SHIFT: u32 = 20;

/// Wire addresses occupy the low 16 bits of a register key.
pub const ADDRESS_MASK: u32 = 0xFFFF;

/// Bit 16 never appears on the wire; it tags pseudo registers.
pub const PSEUDO_REGISTER_FLAG: u32 = 0x1_0000;

/// Modbus function: read coils
pub const FC_READ_COILS: u8 = 0x01;

/// Modbus function: read discrete inputs
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Modbus function: read holding registers
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Modbus function: read input registers
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Modbus function: write single coil
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Modbus function: write single register
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Modbus function: write multiple registers
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Coil ON as written by function 5
pub const COIL_ON: u16 = 0xFF00;

/// Coil OFF as written by function 5
pub const COIL_OFF: u16 = 0x0000;

/// Default slave id when the descriptor does not name one
pub const DEFAULT_SLAVE_ID: u8 = 1;

/// Default read function; descriptor keys without a bucket land here
pub const DEFAULT_READ_COMMAND: u8 = FC_READ_HOLDING_REGISTERS;

/// Default write function for registers without `write_command`
pub const DEFAULT_WRITE_COMMAND: u8 = FC_WRITE_SINGLE_REGISTER;

/// Idle window after which cached values are cleared
pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_secs(120);

/// Shortest idle window accepted from configuration
pub const MIN_IDLE_WINDOW: Duration = Duration::from_secs(30);

/// Upper bound on registers packed into one function 16 request
pub const MAX_WRITE_REGISTERS: usize = 123;
