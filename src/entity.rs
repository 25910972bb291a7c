//! Entity catalogue: one typed variant per user-facing value.
//!
//! Built once per device from the descriptor and the device plugin. The
//! catalogue only describes entities; their values live in the store under
//! the same names.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::register::{EntityClass, ProtocolDescriptor, RegisterDef, RegisterKey};
use crate::vendors::DevicePlugin;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum EntityKind {
    Sensor {
        name: String,
        unit: Option<String>,
        icon: Option<String>,
        display_precision: Option<u8>,
        /// Present for enum-valued sensors.
        options: Option<BTreeMap<i64, String>>,
    },
    Number {
        name: String,
        key: RegisterKey,
        min: Option<f64>,
        max: Option<f64>,
        step: f64,
        unit: Option<String>,
        icon: Option<String>,
        display_precision: Option<u8>,
    },
    Select {
        name: String,
        key: RegisterKey,
        options: BTreeMap<i64, String>,
    },
    Switch {
        name: String,
        key: RegisterKey,
        icon: Option<String>,
    },
    Time {
        name: String,
        key: RegisterKey,
        icon: Option<String>,
    },
    Button {
        name: String,
        key: RegisterKey,
        icon: Option<String>,
    },
}

impl EntityKind {
    pub fn name(&self) -> &str {
        match self {
            EntityKind::Sensor { name, .. }
            | EntityKind::Number { name, .. }
            | EntityKind::Select { name, .. }
            | EntityKind::Switch { name, .. }
            | EntityKind::Time { name, .. }
            | EntityKind::Button { name, .. } => name,
        }
    }

    /// Register a command for this entity is written to; sensors have none.
    pub fn key(&self) -> Option<RegisterKey> {
        match self {
            EntityKind::Sensor { .. } => None,
            EntityKind::Number { key, .. }
            | EntityKind::Select { key, .. }
            | EntityKind::Switch { key, .. }
            | EntityKind::Time { key, .. }
            | EntityKind::Button { key, .. } => Some(*key),
        }
    }

    pub fn is_writable(&self) -> bool {
        self.key().is_some()
    }

    /// Plain measurement sensor.
    pub fn sensor(name: impl Into<String>, icon: Option<&str>, display_precision: Option<u8>) -> Self {
        EntityKind::Sensor {
            name: name.into(),
            unit: None,
            icon: icon.map(str::to_string),
            display_precision,
            options: None,
        }
    }

    /// Integer number entity with a fixed range.
    pub fn counter(name: impl Into<String>, key: RegisterKey, min: f64, max: f64, icon: &str) -> Self {
        EntityKind::Number {
            name: name.into(),
            key,
            min: Some(min),
            max: Some(max),
            step: 1.0,
            unit: None,
            icon: Some(icon.to_string()),
            display_precision: Some(0),
        }
    }

    pub fn time(name: impl Into<String>, key: RegisterKey, icon: Option<&str>) -> Self {
        EntityKind::Time {
            name: name.into(),
            key,
            icon: icon.map(str::to_string),
        }
    }

    /// Generic mapping of one register definition.
    pub fn from_register(def: &RegisterDef) -> Option<Self> {
        let name = def.name.clone();
        let key = def.key;
        let icon = def.icon.clone();
        let entity = match def.entity_class {
            EntityClass::Sensor => EntityKind::Sensor {
                name,
                unit: def.unit.clone(),
                icon,
                display_precision: def.display_precision,
                options: def.has_enum().then(|| def.enum_map.clone()),
            },
            EntityClass::Number => EntityKind::Number {
                name,
                key,
                min: def.min_value,
                max: def.max_value,
                step: def.step.unwrap_or(def.scale),
                unit: def.unit.clone(),
                icon,
                display_precision: def.display_precision,
            },
            EntityClass::Select if def.has_enum() => EntityKind::Select {
                name,
                key,
                options: def.enum_map.clone(),
            },
            EntityClass::Select => {
                log::warn!("Select {name} has no enum; skipped");
                return None;
            }
            EntityClass::Switch => EntityKind::Switch { name, key, icon },
            EntityClass::Time => EntityKind::Time { name, key, icon },
            EntityClass::Button => EntityKind::Button { name, key, icon },
        };
        Some(entity)
    }
}

/// Full entity list for a device: descriptor registers, then plugin extras.
pub fn catalogue(descriptor: &ProtocolDescriptor, plugin: &dyn DevicePlugin) -> Vec<EntityKind> {
    let mut entities: Vec<EntityKind> = descriptor
        .registers()
        .filter(|def| !plugin.owns_register(def.key))
        .filter_map(|def| plugin.entity_for(def).or_else(|| EntityKind::from_register(def)))
        .collect();
    entities.extend(plugin.extra_entities(descriptor));
    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vendors::GenericPlugin;
    use serde_json::json;

    fn descriptor() -> ProtocolDescriptor {
        ProtocolDescriptor::from_json_value(json!({
            "registers": {
                "0x01": { "name": "pv_voltage", "scale": 0.1, "unit": "V", "display_precision": 1 },
                "0x02": { "name": "work_mode", "sensor_type": "select",
                          "enum": { "0": "Off", "1": "On" } },
                "0x03": { "name": "charge_limit", "sensor_type": "number", "scale": 0.1,
                          "min_value": 0, "max_value": 100 },
                "0x04": { "name": "broken_select", "sensor_type": "select" },
                "0x05": { "name": "output", "sensor_type": "switch" },
                "0x06": { "name": "reset", "sensor_type": "button", "write_value": 1 },
                "0x07": { "name": "status", "enum": { "0": "Idle", "1": "Running" } }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_generic_catalogue() {
        let entities = catalogue(&descriptor(), &GenericPlugin::new("PZEMV04"));
        let names: Vec<&str> = entities.iter().map(EntityKind::name).collect();
        assert_eq!(
            names,
            vec!["pv_voltage", "work_mode", "charge_limit", "output", "reset", "status"]
        );
    }

    #[test]
    fn test_number_step_defaults_to_scale() {
        let desc = descriptor();
        let def = desc.by_name("charge_limit").unwrap();
        match EntityKind::from_register(def).unwrap() {
            EntityKind::Number { step, min, max, .. } => {
                assert_eq!(step, 0.1);
                assert_eq!(min, Some(0.0));
                assert_eq!(max, Some(100.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_enum_sensor_carries_options() {
        let desc = descriptor();
        let entity = EntityKind::from_register(desc.by_name("status").unwrap()).unwrap();
        assert!(matches!(entity, EntityKind::Sensor { options: Some(_), .. }));
        assert!(!entity.is_writable());
    }

    #[test]
    fn test_serializes_with_platform_tag() {
        let desc = descriptor();
        let entity = EntityKind::from_register(desc.by_name("output").unwrap()).unwrap();
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["platform"], "switch");
        assert_eq!(json["name"], "output");
    }
}
