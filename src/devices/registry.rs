//! Device lookup and method dispatch

use super::{Device, DeviceError, MethodKind};
use crate::bridge::EventSink;
use gatekeeper_shared::RegistryEntry;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while resolving or invoking a device method
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("unknown method {method} on device {device}")]
    UnknownMethod { device: String, method: String },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Owns the configured devices; lives on the bridge's worker thread
pub struct DeviceRegistry {
    devices: HashMap<String, Box<dyn Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: impl Into<String>, device: Box<dyn Device>) {
        self.devices.insert(id.into(), device);
    }

    /// Hand every device its identity and the event handoff channel
    pub fn attach_sinks(&mut self, sink: &EventSink) {
        for (id, device) in &mut self.devices {
            device.attach_sink(id, sink.clone());
        }
    }

    /// Resolve and invoke a named method
    pub fn invoke(
        &mut self,
        device_id: &str,
        method: &str,
        args: &[Value],
    ) -> Result<Value, RegistryError> {
        let device = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| RegistryError::UnknownDevice(device_id.to_string()))?;

        if !device.methods().iter().any(|m| m.name == method) {
            return Err(RegistryError::UnknownMethod {
                device: device_id.to_string(),
                method: method.to_string(),
            });
        }

        Ok(device.invoke(method, args)?)
    }

    /// Immutable metadata snapshot for the network domain
    pub fn catalog(&self) -> Catalog {
        let entries = self
            .devices
            .iter()
            .map(|(id, device)| {
                let methods = device
                    .methods()
                    .iter()
                    .map(|m| (m.name.to_string(), m.kind))
                    .collect();
                (
                    id.clone(),
                    CatalogEntry {
                        kind: device.kind().to_string(),
                        pins: device.pins(),
                        methods,
                    },
                )
            })
            .collect();
        Catalog { entries }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    kind: String,
    pins: Vec<u8>,
    methods: HashMap<String, MethodKind>,
}

/// Immutable device metadata shared with the RPC layer.
///
/// The live device objects stay on the worker thread; the network domain
/// only ever consults this snapshot.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: HashMap<String, CatalogEntry>,
}

impl Catalog {
    /// True only for a known device method classified read-only.
    /// Unknown names gate as mutating so they still face lease admission
    /// before the bridge rejects them.
    pub fn is_read_only(&self, device_id: &str, method: &str) -> bool {
        self.entries
            .get(device_id)
            .and_then(|e| e.methods.get(method))
            .map(|kind| *kind == MethodKind::ReadOnly)
            .unwrap_or(false)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.entries.contains_key(device_id)
    }

    /// The retained registry map: device id -> `{type, pin}`
    pub fn registry_payload(&self) -> HashMap<String, RegistryEntry> {
        self.entries
            .iter()
            .map(|(id, e)| {
                (
                    id.clone(),
                    RegistryEntry {
                        kind: e.kind.clone(),
                        pin: e.pins.clone(),
                    },
                )
            })
            .collect()
    }
}
