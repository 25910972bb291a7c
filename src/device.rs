//! # Device
//!
//! One attached device: its descriptor, its plugin and its value store.
//!
//! Inbound frames run decode, plugin hooks and the generic pipeline under a
//! single store lock, so a frame's updates become visible together. Outbound
//! commands are planned against the same store and committed optimistically
//! once the frame was delivered.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;

use crate::command::{generic_plan, CommandValue, WritePlan, WriteTarget};
use crate::constants::{DEFAULT_IDLE_WINDOW, MIN_IDLE_WINDOW};
use crate::entity::{catalogue, EntityKind};
use crate::error::SolarError;
use crate::frame::{decode_frame, encode_for_descriptor, WriteValue};
use crate::register::{EntityClass, ProtocolDescriptor, RegisterKey};
use crate::store::{lock, Bounds, ChangeSet, LogicalValue, RegisterStore, SharedStore, StoreUpdate};
use crate::util::LogThrottle;
use crate::vendors::{Action, DecodeContext, DevicePlugin, PluginRegistry, WriteRequest};

fn default_idle_secs() -> u64 {
    DEFAULT_IDLE_WINDOW.as_secs()
}

/// Per-device settings supplied by the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceConfig {
    pub serial: String,
    pub model: String,
    /// Overrides the plugin and descriptor slave id.
    #[serde(default)]
    pub slave_id: Option<u8>,
    /// Seconds without a resolved frame before values go stale.
    #[serde(default = "default_idle_secs")]
    pub idle_window: u64,
}

impl DeviceConfig {
    pub fn new(serial: impl Into<String>, model: impl Into<String>) -> Self {
        DeviceConfig {
            serial: serial.into(),
            model: model.into(),
            slave_id: None,
            idle_window: default_idle_secs(),
        }
    }

    pub fn with_slave_id(mut self, slave_id: u8) -> Self {
        self.slave_id = Some(slave_id);
        self
    }

    pub fn with_idle_window(mut self, window: Duration) -> Self {
        self.idle_window = window.as_secs();
        self
    }

    /// Idle window, never shorter than [`MIN_IDLE_WINDOW`].
    pub fn idle_window(&self) -> Duration {
        let window = Duration::from_secs(self.idle_window);
        if window < MIN_IDLE_WINDOW {
            log::warn!(
                "Idle window {}s for {} raised to {}s",
                self.idle_window,
                self.serial,
                MIN_IDLE_WINDOW.as_secs()
            );
            MIN_IDLE_WINDOW
        } else {
            window
        }
    }
}

/// Encoded outbound frame and the names its optimistic update changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub frame: Vec<u8>,
    pub changed: ChangeSet,
}

/// What one inbound frame did to the store.
#[derive(Debug)]
pub struct FrameOutcome {
    pub changed: ChangeSet,
    /// Registers skipped while decoding; the rest of the frame still applied.
    pub diagnostics: Vec<SolarError>,
}

/// Encoded write whose store update waits for delivery.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub frame: Vec<u8>,
    update: StoreUpdate,
}

pub struct Device {
    serial: String,
    slave_id: u8,
    descriptor: Arc<ProtocolDescriptor>,
    plugin: Box<dyn DevicePlugin>,
    store: SharedStore,
    entities: Vec<EntityKind>,
    /// Malformed frames tend to repeat every poll.
    reject_log: Mutex<LogThrottle>,
}

impl Device {
    /// Build a device with the plugin registered for `config.model`.
    pub fn new(
        config: &DeviceConfig,
        descriptor: Arc<ProtocolDescriptor>,
        registry: &PluginRegistry,
    ) -> Result<Self, SolarError> {
        let plugin = registry.create(&config.model)?;
        Ok(Self::with_plugin(config, descriptor, plugin))
    }

    pub fn with_plugin(
        config: &DeviceConfig,
        descriptor: Arc<ProtocolDescriptor>,
        plugin: Box<dyn DevicePlugin>,
    ) -> Self {
        let slave_id = config
            .slave_id
            .unwrap_or_else(|| plugin.slave_id(&descriptor));
        let names = descriptor
            .registers()
            .filter(|def| !plugin.owns_register(def.key))
            .map(|def| def.name.clone())
            .chain(plugin.extra_names(&descriptor));
        let store = RegisterStore::with_names(config.idle_window(), names).into_shared();
        let entities = catalogue(&descriptor, plugin.as_ref());

        log::info!(
            "Device {} ({}): slave {}, {} registers, {} entities",
            config.serial,
            plugin.model(),
            slave_id,
            descriptor.len(),
            entities.len()
        );

        Device {
            serial: config.serial.clone(),
            slave_id,
            descriptor,
            plugin,
            store,
            entities,
            reject_log: Mutex::new(LogThrottle::new(60_000, 3)),
        }
    }

    /// Decode one inbound frame and fold it into the store.
    pub fn process_frame(&self, data: &[u8]) -> Result<ChangeSet, SolarError> {
        self.ingest(data).map(|outcome| outcome.changed)
    }

    /// [`process_frame`](Self::process_frame), keeping the per-field diagnostics.
    pub fn ingest(&self, data: &[u8]) -> Result<FrameOutcome, SolarError> {
        let frame = match decode_frame(data, &self.descriptor) {
            Ok(frame) => frame,
            Err(e) => {
                let mut throttle = self.reject_log.lock().unwrap_or_else(|p| p.into_inner());
                if throttle.allow() {
                    log::warn!("Rejected frame from {}: {e}", self.serial);
                }
                return Err(e);
            }
        };
        if frame.header.slave_id != self.slave_id {
            log::debug!(
                "Frame for {} carries slave id {} (expected {})",
                self.serial,
                frame.header.slave_id,
                self.slave_id
            );
        }
        let mut raw = frame.registers;
        let diagnostics = frame.diagnostics;

        let mut store = lock(&self.store);
        let update = {
            let ctx = DecodeContext::new(&self.descriptor, &store);
            self.plugin.decode_extra(&mut raw, &ctx)
        };
        let mut changed = store.commit(update);
        changed.extend(store.apply(&raw, &self.descriptor));
        Ok(FrameOutcome {
            changed,
            diagnostics,
        })
    }

    /// Canonical key and, when addressed by name, the name of a write target.
    fn resolve<'t>(&self, target: &'t WriteTarget) -> Result<(RegisterKey, Option<&'t str>), SolarError> {
        match target {
            WriteTarget::Name(name) => self
                .descriptor
                .by_name(name)
                .map(|def| def.key)
                .or_else(|| self.plugin.resolve_name(name, &self.descriptor))
                .map(|key| (key, Some(name.as_str())))
                .ok_or_else(|| SolarError::UnknownName(name.clone())),
            WriteTarget::Key(key) => Ok((self.descriptor.normalize(*key), None)),
        }
    }

    /// Plan and encode one write without touching the store.
    pub fn prepare(&self, target: &WriteTarget, value: &CommandValue) -> Result<PendingCommand, SolarError> {
        let (key, name) = self.resolve(target)?;
        let plan = {
            let store = lock(&self.store);
            let ctx = DecodeContext::new(&self.descriptor, &store);
            let request = WriteRequest { key, name, value };
            match self.plugin.build_write(&request, &ctx)? {
                Some(plan) => plan,
                None => {
                    let def = self
                        .descriptor
                        .register(key)
                        .ok_or(SolarError::UnknownRegister(key))?;
                    generic_plan(def, value, self.descriptor.endianness, store.bounds(&def.name))?
                }
            }
        };

        let frame = self.encode(&plan)?;
        log::debug!("Write {} -> {}: {:?}", target, plan.key, plan.value);
        Ok(PendingCommand {
            frame,
            update: plan.update,
        })
    }

    /// Apply the optimistic update of a delivered write.
    pub fn confirm(&self, pending: PendingCommand) -> Command {
        let changed = lock(&self.store).commit(pending.update);
        Command {
            frame: pending.frame,
            changed,
        }
    }

    /// [`prepare`](Self::prepare) and [`confirm`](Self::confirm) in one step.
    pub fn command(&self, target: &WriteTarget, value: &CommandValue) -> Result<Command, SolarError> {
        Ok(self.confirm(self.prepare(target, value)?))
    }

    /// [`command`](Self::command), returning only the frame.
    pub fn write(
        &self,
        target: impl Into<WriteTarget>,
        value: impl Into<CommandValue>,
    ) -> Result<Vec<u8>, SolarError> {
        Ok(self.command(&target.into(), &value.into())?.frame)
    }

    fn encode(&self, plan: &WritePlan) -> Result<Vec<u8>, SolarError> {
        encode_for_descriptor(
            &self.descriptor,
            self.slave_id,
            plan.key.address(),
            &plan.value,
            plan.write_command,
        )
    }

    /// Plugin actions plus descriptor registers declared as buttons.
    pub fn actions(&self) -> Vec<Action> {
        let mut actions = self.plugin.actions(&self.descriptor);
        actions.extend(
            self.descriptor
                .registers()
                .filter(|def| def.entity_class == EntityClass::Button)
                .map(|def| Action {
                    name: def.name.clone(),
                    key: def.key,
                    value: def.write_value.unwrap_or(1),
                }),
        );
        actions
    }

    /// Frame for a named button press.
    pub fn perform_action(&self, name: &str) -> Result<Vec<u8>, SolarError> {
        let action = self
            .actions()
            .into_iter()
            .find(|a| a.name == name)
            .ok_or_else(|| SolarError::UnknownName(name.to_string()))?;
        let write_command = self
            .descriptor
            .register(action.key)
            .map(|def| def.write_command)
            .unwrap_or(self.descriptor.write_command);
        log::info!("Action {name} on {}", self.serial);
        let plan = WritePlan {
            key: action.key,
            value: WriteValue::Word(action.value),
            write_command,
            update: Default::default(),
        };
        self.encode(&plan)
    }

    /// Frames that set the device clock to `now`; empty for models without one.
    pub fn time_sync_frames(&self, now: &NaiveDateTime) -> Result<Vec<Vec<u8>>, SolarError> {
        let plans = {
            let store = lock(&self.store);
            let ctx = DecodeContext::new(&self.descriptor, &store);
            self.plugin.time_sync(now, &ctx)?
        };
        plans.iter().map(|plan| self.encode(plan)).collect()
    }

    pub fn config_payload(&self) -> Value {
        self.plugin.config_payload(&self.descriptor, self.slave_id)
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn model(&self) -> &str {
        self.plugin.model()
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    pub fn descriptor(&self) -> &ProtocolDescriptor {
        &self.descriptor
    }

    pub fn entities(&self) -> &[EntityKind] {
        &self.entities
    }

    pub fn get(&self, name: &str) -> Option<LogicalValue> {
        lock(&self.store).get(name).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, LogicalValue> {
        lock(&self.store).snapshot()
    }

    /// Current range of a gated value, else the descriptor's own range.
    pub fn bounds(&self, name: &str) -> Option<Bounds> {
        lock(&self.store).bounds(name).or_else(|| {
            let def = self.descriptor.by_name(name)?;
            Some(Bounds::new(def.min_value?, def.max_value?))
        })
    }

    /// Handle for the staleness watchdog.
    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn clear(&self) -> ChangeSet {
        lock(&self.store).clear()
    }
}
