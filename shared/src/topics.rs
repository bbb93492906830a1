//! MQTT topic contract
//!
//! Remote clients interoperate against these exact topic strings, so any
//! change here is a breaking protocol change.
//!
//! | Topic | Retained | Payload |
//! |---|---|---|
//! | `pi/status` | yes | `online` / `offline` (bare string, last-will) |
//! | `pi/devices/registry` | yes | JSON map device id -> `{type, pin}` |
//! | `pi/devices/{device}/state` | yes | JSON `{property, value, timestamp}` |
//! | `pi/rpc/commands` | no | JSON request envelope |
//! | `pi/rpc/responses/{client_id}` | no | JSON response envelope |
//! | `pi/logs/audit` | no | JSON audit record |
//! | `pi/logs/system/{level}` | no | JSON log record |
//! | `pi/system/telemetry` | no | JSON `{uptime_ms, status, timestamp}` |

/// Daemon liveness, retained, maintained by the broker's last will
pub const STATUS: &str = "pi/status";

/// Retained snapshot of the configured device set
pub const REGISTRY: &str = "pi/devices/registry";

/// Inbound RPC requests from all clients
pub const RPC_COMMANDS: &str = "pi/rpc/commands";

/// Access-control decision log
pub const AUDIT_LOG: &str = "pi/logs/audit";

/// Periodic system health publication
pub const TELEMETRY: &str = "pi/system/telemetry";

/// Retained state topic for one device
pub fn device_state(device: &str) -> String {
    format!("pi/devices/{device}/state")
}

/// Per-client response topic
pub fn rpc_response(client_id: &str) -> String {
    format!("pi/rpc/responses/{client_id}")
}

/// System log topic for one severity level
pub fn system_log(level: &str) -> String {
    format!("pi/logs/system/{level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_contract_is_stable() {
        assert_eq!(STATUS, "pi/status");
        assert_eq!(REGISTRY, "pi/devices/registry");
        assert_eq!(RPC_COMMANDS, "pi/rpc/commands");
        assert_eq!(AUDIT_LOG, "pi/logs/audit");
        assert_eq!(TELEMETRY, "pi/system/telemetry");
        assert_eq!(device_state("led1"), "pi/devices/led1/state");
        assert_eq!(rpc_response("client-a"), "pi/rpc/responses/client-a");
        assert_eq!(system_log("error"), "pi/logs/system/error");
    }
}
