//! # Composite Field Transformers
//!
//! Pure functions for registers whose raw word packs several fields. Device
//! plugins combine them with store state; nothing here touches a store.
//!
//! | layout                   | bits (high to low)                                   |
//! |--------------------------|------------------------------------------------------|
//! | schedule with interval   | `hour:5 minute:6 interval_days:5`                    |
//! | byte pair                | `high:8 low:8`                                       |
//! | software version         | `major:2 minor:4 patch:6` in the low 12 bits          |
//! | network time (2 words)   | `year-2024:6 month:4 day:5 hour:5 minute:6 second:6` |
//! | decimal clock            | `hour * 100 + minute`                                |

use std::collections::HashMap;

use chrono::{Datelike, Timelike};

use crate::error::SolarError;
use crate::store::Bounds;

/// Hour, minute and repeat interval packed into one schedule register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTime {
    pub hour: u8,
    pub minute: u8,
    pub interval_days: u8,
}

fn check(field: &str, value: i64, min: i64, max: i64) -> Result<(), SolarError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SolarError::out_of_range(field, value, min, max))
    }
}

fn check_clock(hour: i64, minute: i64) -> Result<(), SolarError> {
    check("hour", hour, 0, 23)?;
    check("minute", minute, 0, 59)
}

/// Unpack `hour:5 | minute:6 | interval_days:5`.
pub fn unpack_schedule(raw: u16) -> Result<ScheduleTime, SolarError> {
    let hour = (raw >> 11) & 0x1F;
    let minute = (raw >> 5) & 0x3F;
    let interval_days = raw & 0x1F;
    check_clock(hour.into(), minute.into())?;
    Ok(ScheduleTime {
        hour: hour as u8,
        minute: minute as u8,
        interval_days: interval_days as u8,
    })
}

/// Exact inverse of [`unpack_schedule`].
pub fn pack_schedule(hour: u8, minute: u8, interval_days: u8) -> Result<u16, SolarError> {
    check_clock(hour.into(), minute.into())?;
    check("interval_days", interval_days.into(), 0, 31)?;
    Ok(u16::from(hour) << 11 | u16::from(minute) << 5 | u16::from(interval_days))
}

/// Swap the 16-bit halves of a 32-bit value.
pub const fn swap_words(value: u32) -> u32 {
    ((value & 0xFFFF) << 16) | (value >> 16)
}

/// `(high, low)` bytes of a word.
pub const fn split_bytes(value: u16) -> (u8, u8) {
    ((value >> 8) as u8, (value & 0xFF) as u8)
}

pub const fn join_bytes(high: u8, low: u8) -> u16 {
    (high as u16) << 8 | low as u16
}

/// `V{major}.{minor}.{patch}` from a packed version word.
pub fn decode_version(raw: u16) -> String {
    let major = (raw >> 10) & 0x3;
    let minor = (raw >> 6) & 0x0F;
    let patch = raw & 0x3F;
    format!("V{major}.{minor}.{patch}")
}

/// Decimal `HHMM` to hour and minute.
pub fn decode_hhmm(raw: u16) -> Result<(u8, u8), SolarError> {
    let (hour, minute) = (raw / 100, raw % 100);
    check_clock(hour.into(), minute.into())?;
    Ok((hour as u8, minute as u8))
}

pub fn encode_hhmm(hour: u8, minute: u8) -> Result<u16, SolarError> {
    check_clock(hour.into(), minute.into())?;
    Ok(u16::from(hour) * 100 + u16::from(minute))
}

/// Clock command sent as one word: hour in the high byte, minute in the low.
pub fn clock_from_word(word: i64) -> Result<(u8, u8), SolarError> {
    check("time", word, 0, 0xFFFF)?;
    let (hour, minute) = split_bytes(word as u16);
    check_clock(hour.into(), minute.into())?;
    Ok((hour, minute))
}

/// Parse `HH:MM`.
pub fn parse_clock(text: &str) -> Result<(u8, u8), SolarError> {
    let invalid = || SolarError::invalid_value("time", format!("expected HH:MM, got {text:?}"));
    let (h, m) = text.trim().split_once(':').ok_or_else(invalid)?;
    let hour: i64 = h.trim().parse().map_err(|_| invalid())?;
    let minute: i64 = m.trim().parse().map_err(|_| invalid())?;
    check_clock(hour, minute)?;
    Ok((hour as u8, minute as u8))
}

/// Valid range of one byte inside a byte pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteField {
    pub name: &'static str,
    pub min: u8,
    pub max: u8,
}

impl ByteField {
    pub const fn new(name: &'static str, min: u8, max: u8) -> Self {
        ByteField { name, min, max }
    }

    pub fn validate(&self, value: u8) -> Result<u8, SolarError> {
        check(self.name, value.into(), self.min.into(), self.max.into())?;
        Ok(value)
    }
}

/// Register that packs two byte fields; `high` is `None` when the byte is unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BytePair {
    pub high: Option<ByteField>,
    pub low: ByteField,
}

impl BytePair {
    /// Each field validated on its own, so one bad byte does not hide the other.
    pub fn unpack(&self, raw: u16) -> Vec<Result<(&'static str, u8), SolarError>> {
        let (high, low) = split_bytes(raw);
        let mut fields = Vec::with_capacity(2);
        if let Some(field) = &self.high {
            fields.push(field.validate(high).map(|v| (field.name, v)));
        }
        fields.push(self.low.validate(low).map(|v| (self.low.name, v)));
        fields
    }

    pub fn pack(&self, high: u8, low: u8) -> Result<u16, SolarError> {
        let high = match &self.high {
            Some(field) => field.validate(high)?,
            None => 0,
        };
        Ok(join_bytes(high, self.low.validate(low)?))
    }
}

/// Two words for the network time registers, high word first.
pub fn pack_network_time<T: Datelike + Timelike>(now: &T) -> Result<(u16, u16), SolarError> {
    let year = i64::from(now.year()) - 2024;
    check("year", year, 0, 63)?;
    let packed: u32 = (year as u32 & 0x3F) << 26
        | (now.month() & 0xF) << 22
        | (now.day() & 0x1F) << 17
        | (now.hour() & 0x1F) << 12
        | (now.minute() & 0x3F) << 6
        | (now.second() & 0x3F);
    Ok(((packed >> 16) as u16, (packed & 0xFFFF) as u16))
}

/// Bounds of gated registers per class label, matched case-insensitively.
#[derive(Debug, Clone)]
pub struct GateTable {
    classes: HashMap<String, Vec<Bounds>>,
}

impl GateTable {
    pub fn new<'a>(entries: impl IntoIterator<Item = (&'a str, Vec<Bounds>)>) -> Self {
        GateTable {
            classes: entries
                .into_iter()
                .map(|(label, bounds)| (label.to_ascii_lowercase(), bounds))
                .collect(),
        }
    }

    pub fn lookup(&self, label: &str) -> Option<&[Bounds]> {
        self.classes
            .get(&label.trim().to_ascii_lowercase())
            .map(Vec::as_slice)
    }
}
