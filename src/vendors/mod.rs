//! Device Plugin System for Model-Specific Register Handling
//!
//! Most device families are fully described by their protocol descriptor. A few
//! pack several fields into one register, gate ranges on other registers or need
//! writes that read back stored state. Those override behavior at the hook points
//! of [`DevicePlugin`]:
//!
//! - `decode_extra` consumes composite registers before the generic pipeline
//! - `build_write` plans writes the generic path cannot express
//! - `entity_for` / `extra_entities` shape the entity catalogue
//! - `config_payload`, `actions` and `time_sync` cover device setup and buttons
//!
//! Every hook has a default that falls back to the generic behavior, so a plain
//! descriptor-driven model only needs [`GenericPlugin`].

pub mod makeskyblue;
pub mod megarevo;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::{json, Value};

use crate::command::{CommandValue, WritePlan};
use crate::entity::EntityKind;
use crate::error::SolarError;
use crate::register::{ProtocolDescriptor, RawValue, RegisterDef, RegisterKey};
use crate::store::{RegisterStore, StoreUpdate};

pub use makeskyblue::MakeSkyBlue;
pub use megarevo::Megarevo;

/// Read-only view a plugin works against.
#[derive(Clone, Copy)]
pub struct DecodeContext<'a> {
    pub descriptor: &'a ProtocolDescriptor,
    pub store: &'a RegisterStore,
}

impl<'a> DecodeContext<'a> {
    pub fn new(descriptor: &'a ProtocolDescriptor, store: &'a RegisterStore) -> Self {
        DecodeContext { descriptor, store }
    }

    /// Descriptor name of `address` in the read bucket, else `fallback`.
    pub fn name_or(&self, address: u16, fallback: &str) -> String {
        self.descriptor
            .name_of(self.descriptor.key(address))
            .unwrap_or(fallback)
            .to_string()
    }
}

/// A resolved write: the canonical key plus the name it was addressed by.
#[derive(Debug, Clone, Copy)]
pub struct WriteRequest<'a> {
    pub key: RegisterKey,
    pub name: Option<&'a str>,
    pub value: &'a CommandValue,
}

/// Named one-shot write exposed as a button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub name: String,
    pub key: RegisterKey,
    pub value: i64,
}

/// Model-specific behavior layered over the descriptor.
///
/// Hooks that return `Option` use `None` for "handle generically".
pub trait DevicePlugin: Send + Sync {
    /// Model name as configured, e.g. `"MakeSkyBlue"`.
    fn model(&self) -> &str;

    fn slave_id(&self, descriptor: &ProtocolDescriptor) -> u8 {
        descriptor.slave_id
    }

    /// Hook 1: consume or rewrite composite registers of one decoded frame.
    ///
    /// Registers removed from `raw` are skipped by the generic pipeline.
    fn decode_extra(
        &self,
        _raw: &mut BTreeMap<RegisterKey, RawValue>,
        _ctx: &DecodeContext<'_>,
    ) -> StoreUpdate {
        StoreUpdate::default()
    }

    /// Hook 2: plan a write the generic path cannot express.
    fn build_write(
        &self,
        _request: &WriteRequest<'_>,
        _ctx: &DecodeContext<'_>,
    ) -> Result<Option<WritePlan>, SolarError> {
        Ok(None)
    }

    /// Hook 3: key behind a name that is not a descriptor register.
    fn resolve_name(&self, _name: &str, _descriptor: &ProtocolDescriptor) -> Option<RegisterKey> {
        None
    }

    /// Hook 4: entity for a descriptor register, overriding the generic mapping.
    fn entity_for(&self, _def: &RegisterDef) -> Option<EntityKind> {
        None
    }

    /// Descriptor registers this plugin fully consumes; they get no generic
    /// entity and no store name of their own.
    fn owns_register(&self, _key: RegisterKey) -> bool {
        false
    }

    /// Hook 5: entities with no register of their own in the descriptor.
    fn extra_entities(&self, _descriptor: &ProtocolDescriptor) -> Vec<EntityKind> {
        Vec::new()
    }

    /// Store names beyond the descriptor's register names.
    fn extra_names(&self, descriptor: &ProtocolDescriptor) -> Vec<String> {
        self.extra_entities(descriptor)
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    /// Configuration pushed to the gateway when the device attaches.
    fn config_payload(&self, descriptor: &ProtocolDescriptor, _slave_id: u8) -> Value {
        json!({ "segments": descriptor.segments })
    }

    fn actions(&self, _descriptor: &ProtocolDescriptor) -> Vec<Action> {
        Vec::new()
    }

    /// Writes that set the device clock, sent after attach.
    fn time_sync(
        &self,
        _now: &NaiveDateTime,
        _ctx: &DecodeContext<'_>,
    ) -> Result<Vec<WritePlan>, SolarError> {
        Ok(Vec::new())
    }
}

/// Descriptor-only device family.
#[derive(Debug, Clone)]
pub struct GenericPlugin {
    model: String,
    slave_id: Option<u8>,
    inject_slave_id: bool,
}

impl GenericPlugin {
    pub fn new(model: impl Into<String>) -> Self {
        GenericPlugin {
            model: model.into(),
            slave_id: None,
            inject_slave_id: false,
        }
    }

    /// Fixed slave id regardless of the descriptor.
    pub fn with_slave_id(mut self, slave_id: u8) -> Self {
        self.slave_id = Some(slave_id);
        self
    }

    /// Copy the slave id into every config segment.
    pub fn with_segment_slave_id(mut self) -> Self {
        self.inject_slave_id = true;
        self
    }
}

impl DevicePlugin for GenericPlugin {
    fn model(&self) -> &str {
        &self.model
    }

    fn slave_id(&self, descriptor: &ProtocolDescriptor) -> u8 {
        self.slave_id.unwrap_or(descriptor.slave_id)
    }

    fn config_payload(&self, descriptor: &ProtocolDescriptor, slave_id: u8) -> Value {
        if !self.inject_slave_id {
            return json!({ "segments": descriptor.segments });
        }
        let segments: Vec<Value> = descriptor
            .segments
            .iter()
            .map(|segment| match segment {
                Value::Object(map) => {
                    let mut map = map.clone();
                    map.insert("slave_id".to_string(), json!(slave_id));
                    Value::Object(map)
                }
                other => other.clone(),
            })
            .collect();
        json!({ "segments": segments })
    }
}

type PluginFactory = Arc<dyn Fn() -> Box<dyn DevicePlugin> + Send + Sync>;

#[derive(Clone)]
struct ModelEntry {
    protocol: String,
    factory: PluginFactory,
}

/// Registry for device plugins, keyed by model name.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    inner: Arc<Mutex<HashMap<String, ModelEntry>>>,
}

impl PluginRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model with its protocol file id and plugin factory.
    pub fn register<F>(&self, model: &str, protocol: &str, factory: F) -> Result<(), SolarError>
    where
        F: Fn() -> Box<dyn DevicePlugin> + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if inner.contains_key(model) {
            return Err(SolarError::Other(format!(
                "Plugin already registered for model: {model}"
            )));
        }
        inner.insert(
            model.to_string(),
            ModelEntry {
                protocol: protocol.to_string(),
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    /// Fresh plugin instance for one device.
    pub fn create(&self, model: &str) -> Result<Box<dyn DevicePlugin>, SolarError> {
        let factory = {
            let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            inner.get(model).map(|entry| entry.factory.clone())
        };
        match factory {
            Some(factory) => Ok(factory()),
            None => Err(SolarError::UnknownModel(model.to_string())),
        }
    }

    /// Protocol file id (`protocols/<id>.json`) for a model.
    pub fn protocol_for(&self, model: &str) -> Result<String, SolarError> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner
            .get(model)
            .map(|entry| entry.protocol.clone())
            .ok_or_else(|| SolarError::UnknownModel(model.to_string()))
    }

    pub fn has_model(&self, model: &str) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.contains_key(model)
    }

    /// Registered model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let mut models: Vec<String> = inner.keys().cloned().collect();
        models.sort();
        models
    }

    /// Create a new registry with the built-in device families registered
    pub fn with_defaults() -> Result<Self, SolarError> {
        let registry = Self::new();
        registry.register("MakeSkyBlue", "makeskyblue", || Box::new(MakeSkyBlue::classic()))?;
        registry.register("MakeSkyBlue IoTrix", "iotrix", || Box::new(MakeSkyBlue::iotrix()))?;
        registry.register("Megarevo", "megarevo", || Box::new(Megarevo::new()))?;
        registry.register("JK BMS", "jkbms", || {
            Box::new(GenericPlugin::new("JK BMS").with_slave_id(15))
        })?;
        registry.register("DDSU666", "ddsu666", || {
            Box::new(GenericPlugin::new("DDSU666").with_segment_slave_id())
        })?;
        registry.register("PZEMV04", "pzem_v04", || Box::new(GenericPlugin::new("PZEMV04")))?;
        Ok(registry)
    }
}

/// Pull an integer register out of a decoded frame.
pub(crate) fn take_int(raw: &mut BTreeMap<RegisterKey, RawValue>, key: RegisterKey) -> Option<i64> {
    match raw.get(&key) {
        Some(RawValue::Int(v)) => {
            let v = *v;
            raw.remove(&key);
            Some(v)
        }
        _ => None,
    }
}
