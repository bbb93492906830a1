//! Daemon configuration
//!
//! Plain typed settings with defaults; loading them from a file is the
//! supervisor's concern and happens before this process is handed its
//! config.

use crate::devices::{Button, ButtonTrigger, DeviceRegistry, Led, Motor};
use crate::lease::{LeaseSettings, SafetyAction};
use gatekeeper_shared::{idents, tuning};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported device types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Led,
    Button,
    Motor,
}

/// One configured device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub kind: DeviceKind,
    pub pins: Vec<u8>,
    /// Safe-state actions fired when this device's lease dies uncleanly
    #[serde(default)]
    pub safety: Vec<SafetyAction>,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Bus identity of the daemon itself
    pub client_id: String,
    pub devices: Vec<DeviceConfig>,
    pub lease: LeaseSettings,
    pub sweep_interval_ms: u64,
    pub correlation_max_age_ms: u64,
    pub command_queue_capacity: usize,
    pub event_queue_capacity: usize,
    pub telemetry_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: idents::DAEMON_CLIENT.into(),
            devices: vec![
                DeviceConfig {
                    id: "led1".into(),
                    kind: DeviceKind::Led,
                    pins: vec![17],
                    safety: vec![SafetyAction::new("off")],
                },
                DeviceConfig {
                    id: "button1".into(),
                    kind: DeviceKind::Button,
                    pins: vec![27],
                    safety: vec![],
                },
                DeviceConfig {
                    id: "motor1".into(),
                    kind: DeviceKind::Motor,
                    pins: vec![4, 14],
                    safety: vec![SafetyAction::new("stop")],
                },
            ],
            lease: LeaseSettings::default(),
            sweep_interval_ms: tuning::LEASE_SWEEP_INTERVAL_MS,
            correlation_max_age_ms: tuning::CORRELATION_MAX_AGE_MS,
            command_queue_capacity: tuning::COMMAND_QUEUE_CAPACITY,
            event_queue_capacity: tuning::EVENT_QUEUE_CAPACITY,
            telemetry_interval_ms: tuning::TELEMETRY_INTERVAL_MS,
        }
    }
}

/// Everything configuration-time device setup produces
pub struct DeviceBuild {
    pub registry: DeviceRegistry,
    pub safety: HashMap<String, Vec<SafetyAction>>,
    /// Interrupt handles; the platform pin factory drives these
    pub triggers: Vec<(String, ButtonTrigger)>,
}

impl Config {
    pub fn build_devices(&self) -> anyhow::Result<DeviceBuild> {
        let mut registry = DeviceRegistry::new();
        let mut safety = HashMap::new();
        let mut triggers = Vec::new();

        for device in &self.devices {
            match device.kind {
                DeviceKind::Led => {
                    anyhow::ensure!(
                        device.pins.len() == 1,
                        "led {} needs exactly one pin",
                        device.id
                    );
                    registry.insert(&device.id, Box::new(Led::new(device.pins[0])));
                }
                DeviceKind::Button => {
                    anyhow::ensure!(
                        device.pins.len() == 1,
                        "button {} needs exactly one pin",
                        device.id
                    );
                    let (button, trigger) = Button::new(device.pins[0]);
                    registry.insert(&device.id, Box::new(button));
                    triggers.push((device.id.clone(), trigger));
                }
                DeviceKind::Motor => {
                    anyhow::ensure!(
                        device.pins.len() == 2,
                        "motor {} needs forward and backward pins",
                        device.id
                    );
                    registry.insert(
                        &device.id,
                        Box::new(Motor::new(device.pins[0], device.pins[1])),
                    );
                }
            }
            if !device.safety.is_empty() {
                safety.insert(device.id.clone(), device.safety.clone());
            }
        }

        Ok(DeviceBuild {
            registry,
            safety,
            triggers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_builds() {
        let build = Config::default().build_devices().unwrap();
        assert_eq!(build.registry.len(), 3);
        assert_eq!(build.triggers.len(), 1);
        assert!(build.safety.contains_key("motor1"));
        assert!(!build.safety.contains_key("button1"));
    }

    #[test]
    fn test_bad_pin_count_rejected() {
        let config = Config {
            devices: vec![DeviceConfig {
                id: "motor1".into(),
                kind: DeviceKind::Motor,
                pins: vec![4],
                safety: vec![],
            }],
            ..Config::default()
        };
        assert!(config.build_devices().is_err());
    }
}
