//! Gatekeeper Shared Wire Types
//!
//! This crate provides the JSON payload types and topic contract shared
//! between the gatekeeper daemon and remote MQTT clients. It carries no
//! async code so client implementations can depend on it directly.

pub mod codec;
pub mod topics;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Reserved identities on the bus
pub mod idents {
    /// Client id carried by safety commands synthesized on lease expiry.
    /// No remote client may use this identity.
    pub const SYSTEM_CLIENT: &str = "__gatekeeper";

    /// Pseudo-device that lease operations are addressed to
    pub const LEASE_DEVICE: &str = "_lease";

    /// Resource id covering every device at once
    pub const GLOBAL_RESOURCE: &str = "_all";

    /// Default MQTT identity of the daemon itself
    pub const DAEMON_CLIENT: &str = "pi-gatekeeper";
}

/// Default tuning parameters for the daemon
pub mod tuning {
    /// Lease TTL applied when a grant request does not name one
    pub const LEASE_DEFAULT_TTL_MS: u64 = 30_000;

    /// Upper bound on any requested lease TTL
    pub const LEASE_MAX_TTL_MS: u64 = 300_000;

    /// Interval of the background lease expiry sweep
    pub const LEASE_SWEEP_INTERVAL_MS: u64 = 1_000;

    /// Correlation entries older than this are pruned
    pub const CORRELATION_MAX_AGE_MS: u64 = 60_000;

    /// Bounded capacity of the inbound command queue
    pub const COMMAND_QUEUE_CAPACITY: usize = 64;

    /// Bounded capacity of the outbound event queue
    pub const EVENT_QUEUE_CAPACITY: usize = 256;

    /// Interval of the system telemetry publication
    pub const TELEMETRY_INTERVAL_MS: u64 = 5_000;
}

/// Daemon liveness as published on the status topic.
///
/// The wire form is a bare string rather than JSON so that the broker's
/// last-will mechanism can carry it unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemStatus {
    Online,
    Offline,
}

impl SystemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemStatus::Online => "online",
            SystemStatus::Offline => "offline",
        }
    }
}

/// An RPC request as published by a client on the command topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub response_topic: Option<String>,
}

/// Outcome carried in every RPC response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Denied,
    Error,
}

/// An RPC response as published on the requesting client's response topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub correlation_id: String,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Successful execution, carrying the method's return value
    pub fn ok(correlation_id: impl Into<String>, result: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: ResponseStatus::Ok,
            result: Some(result),
            error: None,
        }
    }

    /// Rejected by the lease gate
    pub fn denied(correlation_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: ResponseStatus::Denied,
            result: None,
            error: Some(reason.into()),
        }
    }

    /// Failed validation or execution
    pub fn error(correlation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: ResponseStatus::Error,
            result: None,
            error: Some(message.into()),
        }
    }
}

/// A property change published retained on a device's state topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatePayload {
    pub property: String,
    pub value: Value,
    pub timestamp: u64,
}

impl DeviceStatePayload {
    pub fn new(property: impl Into<String>, value: Value, timestamp: u64) -> Self {
        Self {
            property: property.into(),
            value,
            timestamp,
        }
    }
}

/// One device's entry in the retained registry map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub pin: Vec<u8>,
}

/// Periodic system health publication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub uptime_ms: u64,
    pub status: String,
    pub timestamp: u64,
}

impl TelemetryPayload {
    pub fn running(uptime_ms: u64) -> Self {
        Self {
            uptime_ms,
            status: "running".into(),
            timestamp: now_ms(),
        }
    }

    pub fn shutting_down(uptime_ms: u64) -> Self {
        Self {
            uptime_ms,
            status: "shutting_down".into(),
            timestamp: now_ms(),
        }
    }
}

/// Structured log record for the system log topics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: String,
    pub module: String,
    pub message: String,
    pub timestamp: u64,
}

impl LogRecord {
    pub fn new(
        level: impl Into<String>,
        module: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level: level.into(),
            module: module.into(),
            message: message.into(),
            timestamp: now_ms(),
        }
    }
}

/// Record of an access-control decision, published on the audit topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub client: String,
    pub device: String,
    pub method: String,
    pub outcome: String,
    pub timestamp: u64,
}

impl AuditRecord {
    pub fn new(
        client: impl Into<String>,
        device: impl Into<String>,
        method: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            client: client.into(),
            device: device.into(),
            method: method.into(),
            outcome: outcome.into(),
            timestamp: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_constructors() {
        let ok = Response::ok("c1", serde_json::json!(true));
        assert_eq!(ok.status, ResponseStatus::Ok);
        assert!(ok.error.is_none());

        let denied = Response::denied("c2", "held by other");
        assert_eq!(denied.status, ResponseStatus::Denied);
        assert!(denied.result.is_none());

        let err = Response::error("c3", "boom");
        assert_eq!(err.status, ResponseStatus::Error);
        assert_eq!(err.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(SystemStatus::Online.as_str(), "online");
        assert_eq!(SystemStatus::Offline.as_str(), "offline");
    }

    #[test]
    fn test_response_status_wire_form() {
        assert_eq!(
            serde_json::to_string(&ResponseStatus::Denied).unwrap(),
            "\"denied\""
        );
    }
}
