use crate::constants::{
    FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
    FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER,
};

/// Modbus function codes seen by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleRegisters,
    Custom(u8),
}

impl FunctionCode {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::ReadCoils => FC_READ_COILS,
            Self::ReadDiscreteInputs => FC_READ_DISCRETE_INPUTS,
            Self::ReadHoldingRegisters => FC_READ_HOLDING_REGISTERS,
            Self::ReadInputRegisters => FC_READ_INPUT_REGISTERS,
            Self::WriteSingleCoil => FC_WRITE_SINGLE_COIL,
            Self::WriteSingleRegister => FC_WRITE_SINGLE_REGISTER,
            Self::WriteMultipleRegisters => FC_WRITE_MULTIPLE_REGISTERS,
            Self::Custom(code) => code,
        }
    }

    pub const fn from_u8(value: u8) -> Self {
        match value {
            FC_READ_COILS => Self::ReadCoils,
            FC_READ_DISCRETE_INPUTS => Self::ReadDiscreteInputs,
            FC_READ_HOLDING_REGISTERS => Self::ReadHoldingRegisters,
            FC_READ_INPUT_REGISTERS => Self::ReadInputRegisters,
            FC_WRITE_SINGLE_COIL => Self::WriteSingleCoil,
            FC_WRITE_SINGLE_REGISTER => Self::WriteSingleRegister,
            FC_WRITE_MULTIPLE_REGISTERS => Self::WriteMultipleRegisters,
            _ => Self::Custom(value),
        }
    }

    /// Coil and discrete-input reads carry a packed bitmap payload.
    pub const fn is_bit_read(self) -> bool {
        matches!(self, Self::ReadCoils | Self::ReadDiscreteInputs)
    }

    pub const fn is_exception(value: u8) -> bool {
        (value & 0x80) != 0
    }
}

impl From<u8> for FunctionCode {
    fn from(value: u8) -> Self {
        Self::from_u8(value)
    }
}
