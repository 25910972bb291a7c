//! # solar-modbus - Register Codec and State Engine for Solar/Power Monitoring Devices
//!
//! The solar-modbus crate decodes Modbus-style register frames coming from
//! inverters, charge controllers, battery management systems and power meters,
//! keeps the resulting logical values per device, and encodes write commands
//! back into CRC-terminated frames.
//!
//! ## Features
//!
//! - Data-driven protocol descriptors (JSON) naming every register, its type,
//!   scale, range and entity class
//! - Frame decoding for read responses (function codes 1-4), register and
//!   byte addressing, big and little endian
//! - Write encoding with CRC-16/MODBUS
//! - A per-device value store with change tracking and a staleness timer
//! - Device plugins for composite registers (packed schedules, clock fields,
//!   word-swapped pairs, dependent ranges)
//! - Entity catalogue for home-automation front-ends
//!
//! ## Usage
//!
//! ```rust,no_run
//! use solar_modbus::{decode_frame, ProtocolDescriptor};
//!
//! # fn main() -> Result<(), solar_modbus::SolarError> {
//! let descriptor = ProtocolDescriptor::from_file("protocols/pzem_v04.json")?;
//! let frame = decode_frame(&[0x01, 0x04, 0x00, 0x00, 0x00, 0x01, 0x08, 0xFC], &descriptor)?;
//! for (key, value) in &frame.registers {
//!     println!("{key}: {value:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod constants;
pub mod device;
pub mod device_manager;
pub mod entity;
pub mod error;
pub mod frame;
pub mod logging;
pub mod register;
pub mod store;
pub mod transform;
pub mod util;
pub mod vendors;

pub use crate::error::SolarError;
pub use crate::logging::{
    init_logger, init_logger_with_level, log_debug, log_error, log_info, log_warn,
};

// Codec
pub use frame::{decode_frame, encode_for_descriptor, encode_write, DecodedFrame, WriteValue};
pub use register::{Endianness, ProtocolDescriptor, RawValue, RegisterDef, RegisterKey, RegisterType};

// State
pub use store::{Bounds, ChangeSet, LogicalValue, RegisterStore, StoreUpdate, Watchdog};

// Device layer
pub use command::{CommandValue, WriteTarget};
pub use device::{Command, Device, DeviceConfig, FrameOutcome, PendingCommand};
pub use device_manager::{DeviceEvent, DeviceManager, Transport};
pub use entity::{catalogue, EntityKind};

// Plugin system
pub use vendors::{DevicePlugin, GenericPlugin, MakeSkyBlue, Megarevo, PluginRegistry};
