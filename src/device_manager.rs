//! # Device Manager
//!
//! Entry point for collaborators that own the transport. The manager keeps one
//! [`Device`] and one staleness [`Watchdog`] per serial number, routes inbound
//! frames to the right device and sends outbound frames through the
//! [`Transport`] given at attach time.
//!
//! Value changes and stale clears are reported on a single event channel.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::command::{CommandValue, WriteTarget};
use crate::device::{Device, DeviceConfig};
use crate::error::SolarError;
use crate::logging::log_error;
use crate::register::ProtocolDescriptor;
use crate::store::{ChangeSet, Watchdog};
use crate::vendors::PluginRegistry;

/// Outbound side of a device link (MQTT bridge, serial gateway, test double).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one encoded command frame.
    async fn send(&self, serial: &str, frame: &[u8]) -> Result<(), SolarError>;

    /// Push the device configuration (polling segments, slave id).
    async fn publish_config(&self, serial: &str, payload: &Value) -> Result<(), SolarError>;
}

/// Notification for consumers of logical values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Names whose value or range changed.
    Changed { serial: String, names: ChangeSet },
    /// Names that went stale and lost their value.
    Cleared { serial: String, names: ChangeSet },
}

struct Attached {
    device: Arc<Device>,
    transport: Arc<dyn Transport>,
    watchdog: Watchdog,
}

/// Manages every attached device.
pub struct DeviceManager {
    registry: PluginRegistry,
    devices: HashMap<String, Attached>,
    events_tx: mpsc::UnboundedSender<DeviceEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<DeviceEvent>>,
}

impl DeviceManager {
    /// Creates a manager with the built-in device families.
    pub fn new() -> Result<Self, SolarError> {
        Ok(Self::with_registry(PluginRegistry::with_defaults()?))
    }

    pub fn with_registry(registry: PluginRegistry) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        DeviceManager {
            registry,
            devices: HashMap::new(),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Event receiver; there is exactly one, so the second call returns `None`.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<DeviceEvent>> {
        self.events_rx.take()
    }

    /// Attach a device, start its watchdog and push its configuration.
    ///
    /// Must run inside a tokio runtime.
    pub async fn attach(
        &mut self,
        config: DeviceConfig,
        descriptor: ProtocolDescriptor,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Device>, SolarError> {
        if self.devices.contains_key(&config.serial) {
            return Err(SolarError::Other(format!(
                "Device already attached: {}",
                config.serial
            )));
        }

        let device = Arc::new(Device::new(&config, Arc::new(descriptor), &self.registry)?);
        let serial = config.serial.clone();

        let events = self.events_tx.clone();
        let watch_serial = serial.clone();
        let watchdog = Watchdog::spawn(device.store(), move |names| {
            log::info!("Device {watch_serial} went stale");
            let _ = events.send(DeviceEvent::Cleared {
                serial: watch_serial.clone(),
                names,
            });
        });

        if let Err(e) = transport
            .publish_config(&serial, &device.config_payload())
            .await
        {
            log_error(&format!("Failed to send config for {serial}: {e}"));
        }

        match device.time_sync_frames(&Local::now().naive_local()) {
            Ok(frames) => {
                for frame in frames {
                    if let Err(e) = transport.send(&serial, &frame).await {
                        log_error(&format!("Failed to send network time to {serial}: {e}"));
                    }
                }
            }
            Err(e) => log_error(&format!("Failed to build network time for {serial}: {e}")),
        }

        log::info!("Attached {} as {}", serial, device.model());
        self.devices.insert(
            serial,
            Attached {
                device: device.clone(),
                transport,
                watchdog,
            },
        );
        Ok(device)
    }

    /// Stop the watchdog and forget the device.
    pub async fn detach(&mut self, serial: &str) -> Result<(), SolarError> {
        let attached = self
            .devices
            .remove(serial)
            .ok_or_else(|| SolarError::UnknownDevice(serial.to_string()))?;
        attached.watchdog.shutdown().await;
        log::info!("Detached {serial}");
        Ok(())
    }

    pub async fn detach_all(&mut self) {
        let serials: Vec<String> = self.devices.keys().cloned().collect();
        for serial in serials {
            if let Err(e) = self.detach(&serial).await {
                log::warn!("Detach {serial}: {e}");
            }
        }
    }

    fn attached(&self, serial: &str) -> Result<&Attached, SolarError> {
        self.devices
            .get(serial)
            .ok_or_else(|| SolarError::UnknownDevice(serial.to_string()))
    }

    fn notify(&self, serial: &str, names: ChangeSet) {
        if !names.is_empty() {
            let _ = self.events_tx.send(DeviceEvent::Changed {
                serial: serial.to_string(),
                names,
            });
        }
    }

    /// Route one inbound frame.
    pub fn handle_frame(&self, serial: &str, data: &[u8]) -> Result<ChangeSet, SolarError> {
        let changed = self.attached(serial)?.device.process_frame(data)?;
        self.notify(serial, changed.clone());
        Ok(changed)
    }

    /// Encode and send a write; the store only changes once the send succeeded.
    pub async fn send_command(
        &self,
        serial: &str,
        target: impl Into<WriteTarget>,
        value: impl Into<CommandValue>,
    ) -> Result<ChangeSet, SolarError> {
        let attached = self.attached(serial)?;
        let pending = attached.device.prepare(&target.into(), &value.into())?;
        attached.transport.send(serial, &pending.frame).await?;
        let command = attached.device.confirm(pending);
        self.notify(serial, command.changed.clone());
        Ok(command.changed)
    }

    pub async fn perform_action(&self, serial: &str, name: &str) -> Result<(), SolarError> {
        let attached = self.attached(serial)?;
        let frame = attached.device.perform_action(name)?;
        attached.transport.send(serial, &frame).await
    }

    pub fn device(&self, serial: &str) -> Option<Arc<Device>> {
        self.devices.get(serial).map(|a| a.device.clone())
    }

    /// Attached serial numbers, sorted.
    pub fn serials(&self) -> Vec<String> {
        let mut serials: Vec<String> = self.devices.keys().cloned().collect();
        serials.sort();
        serials
    }
}
