//! MakeSkyBlue hybrid inverters (classic and IoTrix firmware).
//!
//! Composite registers handled here:
//!
//! | addr  | layout                                        | variant |
//! |-------|-----------------------------------------------|---------|
//! | 0x20  | charge start `hour:5 minute:6 interval:5`     | classic |
//! | 0x21  | charge end, interval unused                   | classic |
//! | 0x22  | discharge start with interval                 | classic |
//! | 0x23  | discharge end, interval unused                | classic |
//! | 0x6E  | inverter factor (high) / power factor (low)   | both    |
//! | 0x91  | packed software version                       | IoTrix  |
//!
//! The interval of 0x20 and 0x22 is exposed as its own number entity behind
//! the pseudo keys `0x10020` and `0x10022`. Battery rated voltage (0x07)
//! gates the ranges of 0x08 and 0x09.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use once_cell::sync::{Lazy, OnceCell};
use serde_json::{json, Value};

use crate::command::{generic_plan, CommandValue, WritePlan};
use crate::constants::FC_WRITE_SINGLE_REGISTER;
use crate::entity::EntityKind;
use crate::error::SolarError;
use crate::register::{ProtocolDescriptor, RawValue, RegisterDef, RegisterKey};
use crate::store::{Bounds, LogicalValue, StoreUpdate};
use crate::transform::{
    clock_from_word, decode_version, pack_network_time, pack_schedule, parse_clock, split_bytes,
    unpack_schedule, GateTable,
};
use crate::vendors::{take_int, DecodeContext, DevicePlugin, WriteRequest};

const REG_INVERTER_AC_VOLTAGE: u16 = 0x02;
const REG_RATED_VOLTAGE: u16 = 0x07;
const REG_DISCHARGE_MIN_VOLTAGE: u16 = 0x08;
const REG_START_DISCHARGE_VOLTAGE: u16 = 0x09;
const REG_NETWORK_TIME_HIGH: u16 = 0x1E;
const REG_NETWORK_TIME_LOW: u16 = 0x1F;
const REG_POWER_FACTOR: u16 = 0x6E;
const REG_SOFTWARE_VERSION: u16 = 0x91;

/// Lowest AC output code allowed once the unit reported a high-voltage model.
const AC_HIGH_VOLTAGE_CODE: i64 = 2;

const INVERTER_FACTOR: &str = "inverter_factor";
const POWER_FACTOR: &str = "power_factor";
const SOFTWARE_VERSION: &str = "software_version";
const DISCHARGE_MIN_VOLTAGE: &str = "battery_discharge_min_voltage";
const START_DISCHARGE_VOLTAGE: &str = "battery_start_discharge_voltage";

/// Schedule register, its default name and the name of its interval facet.
struct Schedule {
    address: u16,
    name: &'static str,
    interval: Option<&'static str>,
}

static SCHEDULES: [Schedule; 4] = [
    Schedule {
        address: 0x20,
        name: "scheduled_force_charge_start_time",
        interval: Some("force_charge_interval"),
    },
    Schedule {
        address: 0x21,
        name: "scheduled_force_charge_end_time",
        interval: None,
    },
    Schedule {
        address: 0x22,
        name: "scheduled_force_discharge_start_time",
        interval: Some("force_discharge_interval"),
    },
    Schedule {
        address: 0x23,
        name: "scheduled_force_discharge_end_time",
        interval: None,
    },
];

fn schedule_at(address: u16) -> Option<&'static Schedule> {
    SCHEDULES.iter().find(|s| s.address == address)
}

fn schedule_for_interval(name: &str) -> Option<&'static Schedule> {
    SCHEDULES.iter().find(|s| s.interval == Some(name))
}

static CLASSIC_GATES: Lazy<GateTable> = Lazy::new(|| {
    GateTable::new([
        ("72V", vec![Bounds::new(60.0, 70.5), Bounds::new(72.0, 84.0)]),
        ("48V", vec![Bounds::new(40.0, 47.0), Bounds::new(48.0, 56.0)]),
        ("24V", vec![Bounds::new(20.0, 23.5), Bounds::new(24.0, 28.0)]),
        ("12V", vec![Bounds::new(10.0, 11.7), Bounds::new(12.0, 14.0)]),
    ])
});

static IOTRIX_GATES: Lazy<GateTable> = Lazy::new(|| {
    GateTable::new([
        ("72V", vec![Bounds::new(60.0, 70.5), Bounds::new(72.0, 88.0)]),
        ("48V", vec![Bounds::new(40.0, 47.0), Bounds::new(48.0, 56.0)]),
        ("24V", vec![Bounds::new(20.0, 23.5), Bounds::new(24.0, 28.0)]),
        ("12V", vec![Bounds::new(10.0, 11.7), Bounds::new(12.0, 14.0)]),
    ])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Classic,
    IoTrix,
}

#[derive(Debug)]
pub struct MakeSkyBlue {
    variant: Variant,
    /// First AC output code seen on the wire; fixed for the plugin's lifetime.
    initial_ac_voltage: OnceCell<i64>,
}

impl MakeSkyBlue {
    pub fn classic() -> Self {
        MakeSkyBlue {
            variant: Variant::Classic,
            initial_ac_voltage: OnceCell::new(),
        }
    }

    pub fn iotrix() -> Self {
        MakeSkyBlue {
            variant: Variant::IoTrix,
            initial_ac_voltage: OnceCell::new(),
        }
    }

    fn has_schedules(&self) -> bool {
        self.variant == Variant::Classic
    }

    fn gates(&self) -> &'static GateTable {
        match self.variant {
            Variant::Classic => &CLASSIC_GATES,
            Variant::IoTrix => &IOTRIX_GATES,
        }
    }

    pub fn initial_ac_voltage(&self) -> Option<i64> {
        self.initial_ac_voltage.get().copied()
    }

    fn decode_gates(
        &self,
        raw: &BTreeMap<RegisterKey, RawValue>,
        ctx: &DecodeContext<'_>,
        update: &mut StoreUpdate,
    ) {
        let key = ctx.descriptor.key(REG_RATED_VOLTAGE);
        let Some(value) = raw.get(&key).and_then(RawValue::as_i64) else {
            return;
        };
        if ctx.store.last_raw(key) == Some(value) {
            return;
        }
        update.raw_marks.push((key, value));

        let label = ctx
            .descriptor
            .register(key)
            .map(|def| def.to_logical(&RawValue::Int(value)))
            .and_then(|logical| logical.label().map(str::to_string));
        let Some(label) = label else {
            log::error!("Invalid rated voltage value: {value}");
            return;
        };
        let Some(bounds) = self.gates().lookup(&label) else {
            log::warn!("No voltage ranges for rated voltage {label}");
            return;
        };
        log::debug!("Detected rated voltage: {label}");

        let targets = [
            (REG_DISCHARGE_MIN_VOLTAGE, DISCHARGE_MIN_VOLTAGE),
            (REG_START_DISCHARGE_VOLTAGE, START_DISCHARGE_VOLTAGE),
        ];
        for ((address, fallback), range) in targets.iter().zip(bounds) {
            update.bounds.push((ctx.name_or(*address, fallback), *range));
        }
    }

    fn decode_power_factor(
        &self,
        raw: &mut BTreeMap<RegisterKey, RawValue>,
        ctx: &DecodeContext<'_>,
        update: &mut StoreUpdate,
    ) {
        let key = ctx.descriptor.key(REG_POWER_FACTOR);
        let Some(value) = take_int(raw, key) else {
            return;
        };
        update.resolved += 1;
        let (inverter, power) = split_bytes(value as u16);
        update.set(INVERTER_FACTOR, LogicalValue::Float(f64::from(inverter) / 100.0));

        match ctx.descriptor.register(key) {
            Some(def) if def.name != INVERTER_FACTOR => {
                update.set(def.name.clone(), def.to_logical(&RawValue::Int(power.into())));
            }
            _ => update.set(POWER_FACTOR, LogicalValue::Int(power.into())),
        }
    }

    fn decode_schedules(
        &self,
        raw: &mut BTreeMap<RegisterKey, RawValue>,
        ctx: &DecodeContext<'_>,
        update: &mut StoreUpdate,
    ) {
        for schedule in &SCHEDULES {
            let key = ctx.descriptor.key(schedule.address);
            let Some(value) = take_int(raw, key) else {
                continue;
            };
            update.resolved += 1;
            match unpack_schedule(value as u16) {
                Ok(time) => {
                    update.set(
                        ctx.name_or(schedule.address, schedule.name),
                        LogicalValue::Schedule {
                            hour: time.hour,
                            minute: time.minute,
                            interval_days: time.interval_days,
                        },
                    );
                    if let Some(interval) = schedule.interval {
                        update.set(interval, LogicalValue::Int(time.interval_days.into()));
                    }
                }
                Err(e) => log::error!("Invalid time for register {key}: {e}"),
            }
        }
    }

    fn decode_version(
        &self,
        raw: &mut BTreeMap<RegisterKey, RawValue>,
        ctx: &DecodeContext<'_>,
        update: &mut StoreUpdate,
    ) {
        let key = ctx.descriptor.key(REG_SOFTWARE_VERSION);
        let Some(value) = take_int(raw, key) else {
            return;
        };
        update.resolved += 1;
        let version = decode_version(value as u16);
        log::debug!("Software version (register {key}): {version}");
        update.set(
            ctx.name_or(REG_SOFTWARE_VERSION, SOFTWARE_VERSION),
            LogicalValue::Text(version),
        );
    }

    /// Read-modify-write of a schedule register or its interval facet.
    fn schedule_write(
        &self,
        request: &WriteRequest<'_>,
        schedule: &Schedule,
        ctx: &DecodeContext<'_>,
    ) -> Result<WritePlan, SolarError> {
        let real = request.key.real();
        let name = ctx.name_or(schedule.address, schedule.name);
        let stored = ctx.store.get(&name);

        let (hour, minute, interval_days) = if request.key.is_pseudo() {
            let target = schedule.interval.unwrap_or(schedule.name);
            let interval = request
                .value
                .as_i64()
                .filter(|v| (0..=31).contains(v))
                .ok_or_else(|| {
                    SolarError::invalid_value(target, format!("interval {:?} not in 0..=31", request.value))
                })?;
            let (hour, minute) = stored.and_then(LogicalValue::clock).unwrap_or((0, 0));
            (hour, minute, interval as u8)
        } else {
            let (hour, minute) = clock_of(request.value, &name)?;
            let interval = match (schedule.interval, stored) {
                (Some(_), Some(LogicalValue::Schedule { interval_days, .. })) => *interval_days,
                _ => 0,
            };
            (hour, minute, interval)
        };

        let packed = pack_schedule(hour, minute, interval_days)?;
        let write_command = ctx
            .descriptor
            .register(real)
            .map(|def| def.write_command)
            .unwrap_or(ctx.descriptor.write_command);

        let mut plan = WritePlan::single(real, packed, write_command);
        plan.update.set(
            name,
            LogicalValue::Schedule {
                hour,
                minute,
                interval_days,
            },
        );
        if let Some(interval) = schedule.interval {
            plan.update.set(interval, LogicalValue::Int(interval_days.into()));
        }
        log::debug!("Schedule {}: {hour:02}:{minute:02} every {interval_days} days", schedule.name);
        Ok(plan)
    }

    /// AC output voltage: enum codes only, and no step down from a high-voltage model.
    fn ac_voltage_write(
        &self,
        def: &RegisterDef,
        value: &CommandValue,
        ctx: &DecodeContext<'_>,
    ) -> Result<WritePlan, SolarError> {
        let code = match value {
            CommandValue::Text(label) => def.enum_code(label),
            other => other.as_i64(),
        }
        .filter(|code| def.enum_label(*code).is_some())
        .ok_or_else(|| {
            log::error!("Invalid inverter_ac_voltage value: {value:?}");
            SolarError::invalid_value(&def.name, format!("{value:?} is not an output voltage option"))
        })?;

        if let Some(initial) = self.initial_ac_voltage() {
            if initial >= AC_HIGH_VOLTAGE_CODE && code < AC_HIGH_VOLTAGE_CODE {
                log::error!(
                    "Inverter AC voltage value {code} not allowed (initial value {initial})"
                );
                return Err(SolarError::invalid_value(
                    &def.name,
                    format!("code {code} not allowed on a unit that reported {initial}"),
                ));
            }
        }

        generic_plan(
            def,
            &CommandValue::Int(code),
            ctx.descriptor.endianness,
            ctx.store.bounds(&def.name),
        )
    }
}

/// Hour and minute from `HH:MM`, a time value or `hour << 8 | minute`.
fn clock_of(value: &CommandValue, target: &str) -> Result<(u8, u8), SolarError> {
    match value {
        CommandValue::Time { hour, minute } => {
            pack_schedule(*hour, *minute, 0)?;
            Ok((*hour, *minute))
        }
        CommandValue::Text(text) => parse_clock(text),
        other => match other.as_i64() {
            Some(word) => clock_from_word(word),
            None => Err(SolarError::invalid_value(target, format!("{other:?} is not a time"))),
        },
    }
}

impl DevicePlugin for MakeSkyBlue {
    fn model(&self) -> &str {
        match self.variant {
            Variant::Classic => "MakeSkyBlue",
            Variant::IoTrix => "MakeSkyBlue IoTrix",
        }
    }

    fn decode_extra(
        &self,
        raw: &mut BTreeMap<RegisterKey, RawValue>,
        ctx: &DecodeContext<'_>,
    ) -> StoreUpdate {
        let mut update = StoreUpdate::default();

        if let Some(code) = raw
            .get(&ctx.descriptor.key(REG_INVERTER_AC_VOLTAGE))
            .and_then(RawValue::as_i64)
        {
            if self.initial_ac_voltage.set(code).is_ok() {
                log::debug!("Initial inverter AC voltage code: {code}");
            }
        }

        self.decode_gates(raw, ctx, &mut update);
        self.decode_power_factor(raw, ctx, &mut update);
        match self.variant {
            Variant::Classic => self.decode_schedules(raw, ctx, &mut update),
            Variant::IoTrix => self.decode_version(raw, ctx, &mut update),
        }
        update
    }

    fn build_write(
        &self,
        request: &WriteRequest<'_>,
        ctx: &DecodeContext<'_>,
    ) -> Result<Option<WritePlan>, SolarError> {
        let address = request.key.address();
        if self.has_schedules() {
            if let Some(schedule) = schedule_at(address) {
                if !request.key.is_pseudo() || schedule.interval.is_some() {
                    return self.schedule_write(request, schedule, ctx).map(Some);
                }
            }
        }
        if request.key.is_pseudo() {
            return Err(SolarError::UnknownRegister(request.key));
        }
        if address == REG_INVERTER_AC_VOLTAGE {
            if let Some(def) = ctx.descriptor.register(request.key) {
                return self.ac_voltage_write(def, request.value, ctx).map(Some);
            }
        }
        Ok(None)
    }

    fn resolve_name(&self, name: &str, descriptor: &ProtocolDescriptor) -> Option<RegisterKey> {
        if !self.has_schedules() {
            return None;
        }
        schedule_for_interval(name).map(|s| descriptor.key(s.address).pseudo())
    }

    fn entity_for(&self, def: &RegisterDef) -> Option<EntityKind> {
        if self.has_schedules() && schedule_at(def.key.address()).is_some() {
            return Some(EntityKind::time(def.name.clone(), def.key, def.icon.as_deref()));
        }
        None
    }

    fn extra_entities(&self, descriptor: &ProtocolDescriptor) -> Vec<EntityKind> {
        let mut entities = vec![EntityKind::sensor(INVERTER_FACTOR, Some("mdi:angle-acute"), Some(2))];
        if self.has_schedules() {
            for schedule in &SCHEDULES {
                if let Some(interval) = schedule.interval {
                    entities.push(EntityKind::counter(
                        interval,
                        descriptor.key(schedule.address).pseudo(),
                        0.0,
                        31.0,
                        "mdi:timer-sync",
                    ));
                }
            }
        }
        entities
    }

    fn config_payload(&self, descriptor: &ProtocolDescriptor, slave_id: u8) -> Value {
        match self.variant {
            Variant::Classic => json!({
                "slave_id": slave_id,
                "read_command": descriptor.read_command,
                "write_command": descriptor.write_command,
                "segments": descriptor.segments,
            }),
            Variant::IoTrix => json!({ "segments": descriptor.segments }),
        }
    }

    fn time_sync(
        &self,
        now: &NaiveDateTime,
        ctx: &DecodeContext<'_>,
    ) -> Result<Vec<WritePlan>, SolarError> {
        if !self.has_schedules() {
            return Ok(Vec::new());
        }
        let (high, low) = pack_network_time(now)?;
        Ok(vec![
            WritePlan::single(ctx.descriptor.key(REG_NETWORK_TIME_HIGH), high, FC_WRITE_SINGLE_REGISTER),
            WritePlan::single(ctx.descriptor.key(REG_NETWORK_TIME_LOW), low, FC_WRITE_SINGLE_REGISTER),
        ])
    }
}
