//! The register module holds the static type table, the register key space and
//! the parsed per-model protocol descriptor.
//!
//! ## Key space
//!
//! Every register is addressed by a [`RegisterKey`]: the function code that
//! reads it, shifted into bits 20 and up, OR-ed with the 16-bit wire address.
//! Holding register 0x07 and input register 0x07 therefore never collide:
//!
//! ```rust
//! use solar_modbus::register::RegisterKey;
//!
//! let holding = RegisterKey::new(3, 0x07);
//! let input = RegisterKey::new(4, 0x07);
//! assert_eq!(holding.raw(), 0x30_0007);
//! assert_ne!(holding, input);
//! assert_eq!(holding.address(), input.address());
//! ```

pub mod descriptor;
pub mod types;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{ADDRESS_MASK, FUNCTION_BUCKET_SHIFT, PSEUDO_REGISTER_FLAG};

pub use descriptor::{Addressing, EntityClass, ProtocolDescriptor, RegisterDef};
pub use types::{Endianness, RawValue, RegisterType};

/// Canonical, function-bucketed register key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegisterKey(u32);

impl RegisterKey {
    /// Key for `address` as read by `function_code`.
    pub const fn new(function_code: u8, address: u16) -> Self {
        RegisterKey(((function_code as u32) << FUNCTION_BUCKET_SHIFT) | address as u32)
    }

    /// Holding register (function 3) key.
    pub const fn holding(address: u16) -> Self {
        Self::new(crate::constants::FC_READ_HOLDING_REGISTERS, address)
    }

    /// Wrap an already bucketed key, e.g. one taken from a protocol file.
    pub const fn from_raw(raw: u32) -> Self {
        RegisterKey(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// 16-bit address as it appears on the wire.
    pub const fn address(self) -> u16 {
        (self.0 & ADDRESS_MASK) as u16
    }

    /// Function code bucket this key lives in.
    pub const fn function_code(self) -> u8 {
        (self.0 >> FUNCTION_BUCKET_SHIFT) as u8
    }

    /// Key with no function bucket at all (plain address from a descriptor).
    pub const fn is_unbucketed(self) -> bool {
        self.0 >> FUNCTION_BUCKET_SHIFT == 0
    }

    pub const fn is_pseudo(self) -> bool {
        self.0 & PSEUDO_REGISTER_FLAG != 0
    }

    /// The pseudo facet of this register; never produced by a decoded frame.
    pub const fn pseudo(self) -> Self {
        RegisterKey(self.0 | PSEUDO_REGISTER_FLAG)
    }

    /// The real wire register behind a pseudo key.
    pub const fn real(self) -> Self {
        RegisterKey(self.0 & !PSEUDO_REGISTER_FLAG)
    }

    /// Move the address into another function bucket, keeping the pseudo flag.
    pub const fn with_function(self, function_code: u8) -> Self {
        let low = self.0 & (ADDRESS_MASK | PSEUDO_REGISTER_FLAG);
        RegisterKey(((function_code as u32) << FUNCTION_BUCKET_SHIFT) | low)
    }

    /// Offset the address within the same bucket.
    pub fn offset(self, delta: u32) -> Self {
        RegisterKey(self.0.wrapping_add(delta))
    }
}

impl fmt::Display for RegisterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl From<u32> for RegisterKey {
    fn from(raw: u32) -> Self {
        RegisterKey(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let key = RegisterKey::new(3, 0x3500);
        assert_eq!(key.raw(), 0x303500);
        assert_eq!(key.function_code(), 3);
        assert_eq!(key.address(), 0x3500);
        assert!(!key.is_unbucketed());
        assert!(RegisterKey::from_raw(0x20).is_unbucketed());
    }

    #[test]
    fn test_pseudo_round_trip() {
        let real = RegisterKey::from_raw(0x20);
        let pseudo = real.pseudo();
        assert_eq!(pseudo.raw(), 0x10020);
        assert!(pseudo.is_pseudo());
        assert_eq!(pseudo.real(), real);
        assert_eq!(pseudo.address(), 0x20);
    }

    #[test]
    fn test_with_function_keeps_pseudo_flag() {
        let key = RegisterKey::from_raw(0x10022).with_function(3);
        assert_eq!(key.raw(), 0x310022);
        assert!(key.is_pseudo());
        assert_eq!(key.real(), RegisterKey::holding(0x22));
    }

    #[test]
    fn test_display() {
        assert_eq!(RegisterKey::holding(0x6E).to_string(), "0x30006E");
    }
}
