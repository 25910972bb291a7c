//! Megarevo hybrid inverters.
//!
//! - Energy counters at 0x3153..=0x3181 arrive with their 16-bit halves swapped.
//! - 0x3500..=0x3503 hold the device clock as byte pairs.
//! - 0x3504..=0x350F hold three charge/discharge windows as decimal `HHMM`.
//!
//! The descriptor must define the clock and window registers so frames carry
//! them, but their names and entities come from this plugin.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use serde_json::{json, Value};

use crate::command::{CommandValue, WritePlan};
use crate::entity::EntityKind;
use crate::error::SolarError;
use crate::register::{ProtocolDescriptor, RawValue, RegisterKey};
use crate::store::{LogicalValue, StoreUpdate};
use crate::transform::{
    clock_from_word, decode_hhmm, encode_hhmm, parse_clock, split_bytes, swap_words, ByteField,
    BytePair,
};
use crate::vendors::{take_int, Action, DecodeContext, DevicePlugin, WriteRequest};

const SWAPPED_WORDS: RangeInclusive<u16> = 0x3153..=0x3181;

/// Device clock registers, high byte first.
static TIME_BASE: [(u16, BytePair); 4] = [
    (
        0x3500,
        BytePair {
            high: Some(ByteField::new("year", 0, 99)),
            low: ByteField::new("month", 1, 12),
        },
    ),
    (
        0x3501,
        BytePair {
            high: Some(ByteField::new("day", 1, 31)),
            low: ByteField::new("unused", 0, 0),
        },
    ),
    (
        0x3502,
        BytePair {
            high: Some(ByteField::new("hour", 0, 23)),
            low: ByteField::new("minute", 0, 59),
        },
    ),
    (
        0x3503,
        BytePair {
            high: Some(ByteField::new("second", 0, 59)),
            low: ByteField::new("week", 1, 7),
        },
    ),
];

static SCHEDULES: [(u16, &str); 12] = [
    (0x3504, "charge_time1_start"),
    (0x3505, "charge_time1_end"),
    (0x3506, "discharge_time1_start"),
    (0x3507, "discharge_time1_end"),
    (0x3508, "charge_time2_start"),
    (0x3509, "charge_time2_end"),
    (0x350A, "discharge_time2_start"),
    (0x350B, "discharge_time2_end"),
    (0x350C, "charge_time3_start"),
    (0x350D, "charge_time3_end"),
    (0x350E, "discharge_time3_start"),
    (0x350F, "discharge_time3_end"),
];

static BUTTONS: [(&str, u16); 4] = [
    ("restore_factory_setting", 0x3416),
    ("clear_record", 0x3417),
    ("clear_statistical", 0x341D),
    ("clear_arc_alarm", 0x3429),
];

/// Number entities of the clock fields: name, icon.
static CLOCK_ICONS: [(&str, &str); 7] = [
    ("year", "mdi:calendar"),
    ("month", "mdi:calendar-month"),
    ("day", "mdi:calendar-today"),
    ("hour", "mdi:clock"),
    ("minute", "mdi:clock"),
    ("second", "mdi:clock"),
    ("week", "mdi:calendar-week"),
];

const UNUSED: &str = "unused";

fn time_base_at(address: u16) -> Option<&'static BytePair> {
    TIME_BASE
        .iter()
        .find(|(a, _)| *a == address)
        .map(|(_, pair)| pair)
}

fn schedule_at(address: u16) -> Option<&'static str> {
    SCHEDULES
        .iter()
        .find(|(a, _)| *a == address)
        .map(|(_, name)| *name)
}

/// Register and byte field behind a clock field name.
fn clock_field(name: &str) -> Option<(u16, &'static ByteField)> {
    TIME_BASE.iter().find_map(|(address, pair)| {
        pair.high
            .iter()
            .chain(std::iter::once(&pair.low))
            .find(|field| field.name == name && field.name != UNUSED)
            .map(|field| (*address, field))
    })
}

fn schedule_names() -> impl Iterator<Item = &'static str> {
    SCHEDULES.iter().map(|(_, name)| *name)
}

#[derive(Debug, Default)]
pub struct Megarevo;

impl Megarevo {
    pub fn new() -> Self {
        Megarevo
    }

    fn decode_time_base(
        &self,
        raw: &mut BTreeMap<RegisterKey, RawValue>,
        ctx: &DecodeContext<'_>,
        update: &mut StoreUpdate,
    ) {
        for (address, pair) in &TIME_BASE {
            let key = ctx.descriptor.key(*address);
            let Some(value) = take_int(raw, key) else {
                continue;
            };
            update.resolved += 1;
            if ctx.store.last_raw(key) == Some(value) {
                continue;
            }
            for field in pair.unpack(value as u16) {
                match field {
                    Ok((UNUSED, _)) => {}
                    Ok((name, byte)) => update.set(name, LogicalValue::Int(byte.into())),
                    Err(e) => log::error!("Invalid time base field in register {key}: {e}"),
                }
            }
            update.raw_marks.push((key, value));
            update.force_changed.extend(schedule_names().map(str::to_string));
        }
    }

    fn decode_schedules(
        &self,
        raw: &mut BTreeMap<RegisterKey, RawValue>,
        ctx: &DecodeContext<'_>,
        update: &mut StoreUpdate,
    ) {
        for (address, name) in &SCHEDULES {
            let key = ctx.descriptor.key(*address);
            let Some(value) = take_int(raw, key) else {
                continue;
            };
            update.resolved += 1;
            if ctx.store.last_raw(key) == Some(value) {
                continue;
            }
            match decode_hhmm(value as u16) {
                Ok((hour, minute)) => {
                    update.set(*name, LogicalValue::Time { hour, minute });
                    update.raw_marks.push((key, value));
                }
                Err(e) => log::error!("Invalid time value {value} for register {key}: {e}"),
            }
        }
    }

    fn time_base_write(
        &self,
        request: &WriteRequest<'_>,
        pair: &BytePair,
        ctx: &DecodeContext<'_>,
    ) -> Result<WritePlan, SolarError> {
        let (high, low) = match (request.value, request.name) {
            (CommandValue::Pair { high, low }, _) => (*high, *low),
            (value, Some(name)) => {
                // One field of the pair; the other comes from the store.
                let byte = value
                    .as_i64()
                    .and_then(|v| u8::try_from(v).ok())
                    .ok_or_else(|| SolarError::invalid_value(name, format!("{value:?} is not a byte")))?;
                let stored = |field: &ByteField| {
                    ctx.store
                        .get(field.name)
                        .and_then(LogicalValue::as_i64)
                        .and_then(|v| u8::try_from(v).ok())
                        .unwrap_or(field.min)
                };
                match &pair.high {
                    Some(field) if field.name == name => (byte, stored(&pair.low)),
                    Some(field) if pair.low.name == name => (stored(field), byte),
                    None if pair.low.name == name => (0, byte),
                    _ => return Err(SolarError::UnknownName(name.to_string())),
                }
            }
            (value, None) => {
                log::error!("Invalid value format for register {}: {value:?}", request.key);
                return Err(SolarError::invalid_value(
                    request.key,
                    "time base writes need both bytes",
                ));
            }
        };

        let packed = pair.pack(high, low)?;
        let mut plan = WritePlan::single(request.key, packed, ctx.descriptor.write_command);
        let (high, low) = split_bytes(packed);
        if let Some(field) = &pair.high {
            plan.update.set(field.name, LogicalValue::Int(high.into()));
        }
        if pair.low.name != UNUSED {
            plan.update.set(pair.low.name, LogicalValue::Int(low.into()));
        }
        plan.update.raw_marks.push((request.key, packed.into()));
        plan.update
            .force_changed
            .extend(schedule_names().map(str::to_string));
        Ok(plan)
    }

    fn schedule_write(
        &self,
        request: &WriteRequest<'_>,
        name: &str,
        ctx: &DecodeContext<'_>,
    ) -> Result<WritePlan, SolarError> {
        let (hour, minute) = match request.value {
            CommandValue::Text(text) => parse_clock(text)?,
            CommandValue::Time { hour, minute } => (*hour, *minute),
            other => match other.as_i64() {
                Some(word) => clock_from_word(word)?,
                None => {
                    return Err(SolarError::invalid_value(name, format!("{other:?} is not a time")))
                }
            },
        };
        let hhmm = encode_hhmm(hour, minute)?;
        let mut plan = WritePlan::single(request.key, hhmm, ctx.descriptor.write_command);
        plan.update.set(name, LogicalValue::Time { hour, minute });
        plan.update.raw_marks.push((request.key, hhmm.into()));
        Ok(plan)
    }
}

impl DevicePlugin for Megarevo {
    fn model(&self) -> &str {
        "Megarevo"
    }

    fn decode_extra(
        &self,
        raw: &mut BTreeMap<RegisterKey, RawValue>,
        ctx: &DecodeContext<'_>,
    ) -> StoreUpdate {
        let mut update = StoreUpdate::default();
        self.decode_time_base(raw, ctx, &mut update);
        self.decode_schedules(raw, ctx, &mut update);

        for (key, value) in raw.iter_mut() {
            if key.function_code() != ctx.descriptor.read_command
                || !SWAPPED_WORDS.contains(&key.address())
            {
                continue;
            }
            if let RawValue::Int(v) = value {
                let swapped = swap_words(*v as u32);
                log::debug!("Register {key}: {swapped} (swapped from {v})");
                *v = swapped.into();
            }
        }
        update
    }

    fn build_write(
        &self,
        request: &WriteRequest<'_>,
        ctx: &DecodeContext<'_>,
    ) -> Result<Option<WritePlan>, SolarError> {
        if request.key.is_pseudo() {
            return Err(SolarError::UnknownRegister(request.key));
        }
        let address = request.key.address();
        if let Some(pair) = time_base_at(address) {
            return self.time_base_write(request, pair, ctx).map(Some);
        }
        if let Some(name) = schedule_at(address) {
            return self.schedule_write(request, name, ctx).map(Some);
        }
        Ok(None)
    }

    fn resolve_name(&self, name: &str, descriptor: &ProtocolDescriptor) -> Option<RegisterKey> {
        clock_field(name)
            .map(|(address, _)| address)
            .or_else(|| SCHEDULES.iter().find(|(_, n)| *n == name).map(|(a, _)| *a))
            .map(|address| descriptor.key(address))
    }

    fn owns_register(&self, key: RegisterKey) -> bool {
        let address = key.address();
        !key.is_pseudo() && (time_base_at(address).is_some() || schedule_at(address).is_some())
    }

    fn extra_entities(&self, descriptor: &ProtocolDescriptor) -> Vec<EntityKind> {
        let mut entities: Vec<EntityKind> = CLOCK_ICONS
            .iter()
            .filter_map(|(name, icon)| {
                clock_field(name).map(|(address, field)| {
                    EntityKind::counter(
                        *name,
                        descriptor.key(address),
                        field.min.into(),
                        field.max.into(),
                        icon,
                    )
                })
            })
            .collect();
        entities.extend(SCHEDULES.iter().map(|(address, name)| {
            let icon = if name.ends_with("start") {
                "mdi:clock"
            } else {
                "mdi:clock-end"
            };
            EntityKind::time(*name, descriptor.key(*address), Some(icon))
        }));
        entities
    }

    fn config_payload(&self, descriptor: &ProtocolDescriptor, _slave_id: u8) -> Value {
        json!({ "segments": descriptor.segments })
    }

    fn actions(&self, descriptor: &ProtocolDescriptor) -> Vec<Action> {
        BUTTONS
            .iter()
            .map(|(name, address)| Action {
                name: name.to_string(),
                key: descriptor.key(*address),
                value: 1,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_IDLE_WINDOW;
    use crate::frame::WriteValue;
    use crate::store::RegisterStore;
    use crate::transform::join_bytes;

    fn descriptor() -> ProtocolDescriptor {
        ProtocolDescriptor::from_json_value(json!({
            "registers": {
                "0x303153": { "name": "pv_energy_total", "type": "UINT32", "scale": 0.1 },
                "0x303200": { "name": "grid_voltage", "scale": 0.1 }
            },
            "segments": [ { "start": 0x3500, "count": 16 } ]
        }))
        .unwrap()
    }

    fn raw(entries: &[(u16, i64)]) -> BTreeMap<RegisterKey, RawValue> {
        entries
            .iter()
            .map(|(addr, v)| (RegisterKey::holding(*addr), RawValue::Int(*v)))
            .collect()
    }

    fn value_of<'a>(update: &'a StoreUpdate, name: &str) -> Option<&'a LogicalValue> {
        update.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    #[test]
    fn test_word_swap_in_range_only() {
        let desc = descriptor();
        let store = RegisterStore::new(DEFAULT_IDLE_WINDOW);
        let mut frame = raw(&[(0x3153, 0x0001_0000), (0x3200, 0x0001_0000)]);
        Megarevo::new().decode_extra(&mut frame, &DecodeContext::new(&desc, &store));
        assert_eq!(frame[&RegisterKey::holding(0x3153)], RawValue::Int(1));
        assert_eq!(frame[&RegisterKey::holding(0x3200)], RawValue::Int(0x0001_0000));
    }

    #[test]
    fn test_time_base_decode_marks_schedules() {
        let desc = descriptor();
        let mut store = RegisterStore::new(DEFAULT_IDLE_WINDOW);
        let mut frame = raw(&[(0x3500, i64::from(join_bytes(25, 3)))]);
        let update = Megarevo::new().decode_extra(&mut frame, &DecodeContext::new(&desc, &store));
        assert!(frame.is_empty());
        assert_eq!(value_of(&update, "year"), Some(&LogicalValue::Int(25)));
        assert_eq!(value_of(&update, "month"), Some(&LogicalValue::Int(3)));
        assert_eq!(update.force_changed.len(), 12);

        let changed = store.commit(update);
        assert!(changed.contains("charge_time3_end"));

        // Unchanged raw value: nothing to report.
        let mut frame = raw(&[(0x3500, i64::from(join_bytes(25, 3)))]);
        let update = Megarevo::new().decode_extra(&mut frame, &DecodeContext::new(&desc, &store));
        assert!(update.values.is_empty());
        assert!(update.force_changed.is_empty());
        assert_eq!(update.resolved, 1);
    }

    #[test]
    fn test_time_base_bad_field_keeps_good_one() {
        let desc = descriptor();
        let store = RegisterStore::new(DEFAULT_IDLE_WINDOW);
        // second 30, week 9 (out of range)
        let mut frame = raw(&[(0x3503, i64::from(join_bytes(30, 9)))]);
        let update = Megarevo::new().decode_extra(&mut frame, &DecodeContext::new(&desc, &store));
        assert_eq!(value_of(&update, "second"), Some(&LogicalValue::Int(30)));
        assert_eq!(value_of(&update, "week"), None);
    }

    #[test]
    fn test_day_register_ignores_unused_byte() {
        let desc = descriptor();
        let store = RegisterStore::new(DEFAULT_IDLE_WINDOW);
        let mut frame = raw(&[(0x3501, i64::from(join_bytes(14, 0)))]);
        let update = Megarevo::new().decode_extra(&mut frame, &DecodeContext::new(&desc, &store));
        assert_eq!(update.values, vec![("day".to_string(), LogicalValue::Int(14))]);
    }

    #[test]
    fn test_schedule_decode() {
        let desc = descriptor();
        let store = RegisterStore::new(DEFAULT_IDLE_WINDOW);
        let mut frame = raw(&[(0x3504, 2230), (0x3505, 2460)]);
        let update = Megarevo::new().decode_extra(&mut frame, &DecodeContext::new(&desc, &store));
        assert_eq!(
            value_of(&update, "charge_time1_start"),
            Some(&LogicalValue::Time { hour: 22, minute: 30 })
        );
        assert_eq!(value_of(&update, "charge_time1_end"), None);
    }

    #[test]
    fn test_schedule_write_from_text_and_word() {
        let desc = descriptor();
        let store = RegisterStore::new(DEFAULT_IDLE_WINDOW);
        let ctx = DecodeContext::new(&desc, &store);
        let plugin = Megarevo::new();
        let key = plugin.resolve_name("discharge_time2_end", &desc).unwrap();
        assert_eq!(key.raw(), 0x30350B);

        let text = CommandValue::Text("06:05".into());
        let plan = plugin
            .build_write(&WriteRequest { key, name: None, value: &text }, &ctx)
            .unwrap()
            .unwrap();
        assert_eq!(plan.value, WriteValue::Word(605));

        let word = CommandValue::Int(0x0A1E);
        let plan = plugin
            .build_write(&WriteRequest { key, name: None, value: &word }, &ctx)
            .unwrap()
            .unwrap();
        assert_eq!(plan.value, WriteValue::Word(1030));
        assert_eq!(
            value_of(&plan.update, "discharge_time2_end"),
            Some(&LogicalValue::Time { hour: 10, minute: 30 })
        );

        let bad = CommandValue::Text("24:00".into());
        assert!(plugin
            .build_write(&WriteRequest { key, name: None, value: &bad }, &ctx)
            .is_err());
    }

    #[test]
    fn test_time_base_pair_write() {
        let desc = descriptor();
        let store = RegisterStore::new(DEFAULT_IDLE_WINDOW);
        let ctx = DecodeContext::new(&desc, &store);
        let key = RegisterKey::holding(0x3502);
        let value = CommandValue::Pair { high: 13, low: 45 };
        let plan = Megarevo::new()
            .build_write(&WriteRequest { key, name: None, value: &value }, &ctx)
            .unwrap()
            .unwrap();
        assert_eq!(plan.value, WriteValue::Word(0x0D2D));
        assert_eq!(value_of(&plan.update, "hour"), Some(&LogicalValue::Int(13)));
        assert_eq!(value_of(&plan.update, "minute"), Some(&LogicalValue::Int(45)));
        assert_eq!(plan.update.force_changed.len(), 12);

        let bad = CommandValue::Pair { high: 24, low: 0 };
        assert!(Megarevo::new()
            .build_write(&WriteRequest { key, name: None, value: &bad }, &ctx)
            .is_err());
        let bare = CommandValue::Int(5);
        assert!(Megarevo::new()
            .build_write(&WriteRequest { key, name: None, value: &bare }, &ctx)
            .is_err());
    }

    #[test]
    fn test_single_clock_field_write_uses_stored_partner() {
        let desc = descriptor();
        let mut store = RegisterStore::new(DEFAULT_IDLE_WINDOW);
        store.set("month", LogicalValue::Int(7));
        let plugin = Megarevo::new();
        let key = plugin.resolve_name("year", &desc).unwrap();
        let value = CommandValue::Int(26);
        let plan = plugin
            .build_write(
                &WriteRequest { key, name: Some("year"), value: &value },
                &DecodeContext::new(&desc, &store),
            )
            .unwrap()
            .unwrap();
        assert_eq!(plan.value, WriteValue::Word(i64::from(join_bytes(26, 7))));
    }

    #[test]
    fn test_pseudo_keys_are_rejected() {
        let desc = descriptor();
        let store = RegisterStore::new(DEFAULT_IDLE_WINDOW);
        let value = CommandValue::Pair { high: 25, low: 4 };
        for address in [0x3500, 0x3504, 0x3200] {
            let key = RegisterKey::holding(address).pseudo();
            let request = WriteRequest { key, name: None, value: &value };
            assert!(matches!(
                Megarevo::new().build_write(&request, &DecodeContext::new(&desc, &store)),
                Err(SolarError::UnknownRegister(k)) if k == key
            ));
        }
    }

    #[test]
    fn test_generic_registers_fall_through() {
        let desc = descriptor();
        let store = RegisterStore::new(DEFAULT_IDLE_WINDOW);
        let value = CommandValue::Float(230.0);
        let request = WriteRequest { key: RegisterKey::holding(0x3200), name: None, value: &value };
        assert!(Megarevo::new()
            .build_write(&request, &DecodeContext::new(&desc, &store))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_entities_and_actions() {
        let desc = descriptor();
        let plugin = Megarevo::new();
        let entities = plugin.extra_entities(&desc);
        assert_eq!(entities.len(), 7 + 12);
        match &entities[0] {
            EntityKind::Number { name, min, max, icon, .. } => {
                assert_eq!(name, "year");
                assert_eq!((*min, *max), (Some(0.0), Some(99.0)));
                assert_eq!(icon.as_deref(), Some("mdi:calendar"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            entities.last(),
            Some(EntityKind::Time { icon: Some(icon), .. }) if icon == "mdi:clock-end"
        ));
        assert!(!plugin.extra_names(&desc).iter().any(|n| n == "unused"));

        let actions = plugin.actions(&desc);
        assert_eq!(actions.len(), 4);
        assert_eq!(actions[3].key, RegisterKey::holding(0x3429));
        assert!(actions.iter().all(|a| a.value == 1));
    }
}
