//! Control lease manager
//!
//! Arbitrates write access across clients: at most one live lease per
//! resource id at any instant. Every mutating command is checked here
//! before it may enter the bridge, and a lease that dies by TTL expiry or
//! admin override fires the resource's configured safety commands into the
//! bridge (the dead-man's switch).
//!
//! The table is owned exclusively by this module and only mutated under
//! its write lock, which makes grant/renew/release/expire linearizable per
//! resource.

mod sweep;

pub use sweep::LeaseSweeper;

use crate::bridge::{Command, CommandSender, EventSink};
use gatekeeper_shared::{idents, now_ms, tuning, AuditRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// A time-bounded exclusive grant over one resource
#[derive(Debug, Clone)]
pub struct Lease {
    pub resource: String,
    pub holder: String,
    pub granted_at_ms: u64,
    pub ttl_ms: u64,
    pub renewed_at_ms: u64,
}

impl Lease {
    pub fn expires_at_ms(&self) -> u64 {
        self.renewed_at_ms + self.ttl_ms
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms()
    }
}

/// Why a lease operation was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaseRefused {
    #[error("{resource} is held by {holder}")]
    Held { resource: String, holder: String },

    #[error("no lease held on {resource}")]
    NotHeld { resource: String },

    #[error("override requires the admin identity")]
    NotAuthorized,
}

/// Verdict on a mutating command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Denied { holder: String },
}

/// One safe-state action fired when a resource's lease dies uncleanly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyAction {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl SafetyAction {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: Vec::new(),
        }
    }
}

/// Lease policy knobs
#[derive(Debug, Clone)]
pub struct LeaseSettings {
    pub default_ttl_ms: u64,
    pub max_ttl_ms: u64,
    /// Distinguished client identity allowed to override foreign leases
    pub admin_client: String,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            default_ttl_ms: tuning::LEASE_DEFAULT_TTL_MS,
            max_ttl_ms: tuning::LEASE_MAX_TTL_MS,
            admin_client: "admin".into(),
        }
    }
}

pub struct LeaseManager {
    settings: LeaseSettings,
    table: RwLock<HashMap<String, Lease>>,
    /// Safe-state actions per device id
    safety: HashMap<String, Vec<SafetyAction>>,
    commands: CommandSender,
    sink: EventSink,
}

impl LeaseManager {
    pub fn new(
        settings: LeaseSettings,
        safety: HashMap<String, Vec<SafetyAction>>,
        commands: CommandSender,
        sink: EventSink,
    ) -> Self {
        Self {
            settings,
            table: RwLock::new(HashMap::new()),
            safety,
            commands,
            sink,
        }
    }

    /// Grant a lease if no live lease by another client covers the
    /// resource. Re-granting a held resource refreshes its deadline.
    pub async fn grant(
        &self,
        client: &str,
        resource: &str,
        ttl_ms: Option<u64>,
    ) -> Result<Lease, LeaseRefused> {
        let ttl = ttl_ms
            .unwrap_or(self.settings.default_ttl_ms)
            .min(self.settings.max_ttl_ms);

        let mut table = self.table.write().await;

        if resource == idents::GLOBAL_RESOURCE {
            // The global lease covers everything, so any foreign lease blocks it
            if let Some(conflict) = table.values().find(|l| l.holder != client) {
                return Err(LeaseRefused::Held {
                    resource: conflict.resource.clone(),
                    holder: conflict.holder.clone(),
                });
            }
        } else {
            for key in [idents::GLOBAL_RESOURCE, resource] {
                if let Some(lease) = table.get(key) {
                    if lease.holder != client {
                        return Err(LeaseRefused::Held {
                            resource: lease.resource.clone(),
                            holder: lease.holder.clone(),
                        });
                    }
                }
            }
        }

        let now = now_ms();
        let lease = Lease {
            resource: resource.to_string(),
            holder: client.to_string(),
            granted_at_ms: now,
            ttl_ms: ttl,
            renewed_at_ms: now,
        };
        table.insert(resource.to_string(), lease.clone());
        drop(table);

        info!(client, resource, ttl_ms = ttl, "lease granted");
        self.sink
            .audit(AuditRecord::new(client, resource, "grant", "granted"));
        Ok(lease)
    }

    /// Heartbeat from the current holder; pushes the deadline out
    pub async fn renew(&self, client: &str, resource: &str) -> Result<Lease, LeaseRefused> {
        let mut table = self.table.write().await;
        match table.get_mut(resource) {
            Some(lease) if lease.holder == client => {
                lease.renewed_at_ms = now_ms();
                let renewed = lease.clone();
                drop(table);
                self.sink
                    .audit(AuditRecord::new(client, resource, "renew", "renewed"));
                Ok(renewed)
            }
            Some(lease) => Err(LeaseRefused::Held {
                resource: lease.resource.clone(),
                holder: lease.holder.clone(),
            }),
            None => Err(LeaseRefused::NotHeld {
                resource: resource.to_string(),
            }),
        }
    }

    /// Explicit release by the holder. Does not fire safety actions: the
    /// holder ended its session cleanly.
    pub async fn release(&self, client: &str, resource: &str) -> Result<(), LeaseRefused> {
        let mut table = self.table.write().await;
        match table.get(resource) {
            Some(lease) if lease.holder == client => {
                table.remove(resource);
                drop(table);
                info!(client, resource, "lease released");
                self.sink
                    .audit(AuditRecord::new(client, resource, "release", "released"));
                Ok(())
            }
            Some(lease) => Err(LeaseRefused::Held {
                resource: lease.resource.clone(),
                holder: lease.holder.clone(),
            }),
            None => Err(LeaseRefused::NotHeld {
                resource: resource.to_string(),
            }),
        }
    }

    /// Forced release by the privileged admin identity. Treated like an
    /// unclean death: safety actions fire.
    pub async fn override_release(&self, client: &str, resource: &str) -> Result<(), LeaseRefused> {
        if client != self.settings.admin_client {
            return Err(LeaseRefused::NotAuthorized);
        }

        let removed = self.table.write().await.remove(resource);
        match removed {
            Some(lease) => {
                warn!(
                    admin = client,
                    resource,
                    holder = %lease.holder,
                    "lease overridden"
                );
                self.sink
                    .audit(AuditRecord::new(client, resource, "override", "overridden"));
                self.fire_safety(resource);
                Ok(())
            }
            None => Err(LeaseRefused::NotHeld {
                resource: resource.to_string(),
            }),
        }
    }

    /// Gate a mutating command. The specific resource is checked first,
    /// falling back to the global resource.
    pub async fn admit(&self, client: &str, resource: &str) -> Admission {
        let table = self.table.read().await;
        for key in [resource, idents::GLOBAL_RESOURCE] {
            if let Some(lease) = table.get(key) {
                if lease.holder != client {
                    return Admission::Denied {
                        holder: lease.holder.clone(),
                    };
                }
            }
        }
        Admission::Admitted
    }

    /// Clear every lease whose deadline has passed, firing its safety
    /// actions exactly once. Idempotent: an already-cleared lease is gone
    /// from the table and cannot fire again.
    pub async fn sweep(&self, now_ms: u64) -> Vec<Lease> {
        let mut table = self.table.write().await;
        let expired_keys: Vec<String> = table
            .iter()
            .filter(|(_, lease)| lease.is_expired(now_ms))
            .map(|(key, _)| key.clone())
            .collect();

        let mut expired = Vec::with_capacity(expired_keys.len());
        for key in expired_keys {
            if let Some(lease) = table.remove(&key) {
                expired.push(lease);
            }
        }
        drop(table);

        for lease in &expired {
            warn!(
                resource = %lease.resource,
                holder = %lease.holder,
                "lease expired without renewal"
            );
            self.sink.audit(AuditRecord::new(
                &lease.holder,
                &lease.resource,
                "expire",
                "expired",
            ));
            self.sink.log(
                "warn",
                "lease",
                format!("lease on {} held by {} expired", lease.resource, lease.holder),
            );
            self.fire_safety(&lease.resource);
        }
        expired
    }

    pub async fn holder(&self, resource: &str) -> Option<String> {
        self.table
            .read()
            .await
            .get(resource)
            .map(|lease| lease.holder.clone())
    }

    /// Push the resource's safe-state commands into the bridge, bypassing
    /// admission. They join the queue FIFO behind already-accepted traffic.
    fn fire_safety(&self, resource: &str) {
        let actions: Vec<(String, SafetyAction)> = if resource == idents::GLOBAL_RESOURCE {
            self.safety
                .iter()
                .flat_map(|(device, actions)| {
                    actions.iter().map(|a| (device.clone(), a.clone()))
                })
                .collect()
        } else {
            self.safety
                .get(resource)
                .map(|actions| {
                    actions
                        .iter()
                        .map(|a| (resource.to_string(), a.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        for (device, action) in actions {
            let command = Command::safety(&device, &action.method, action.args.clone());
            match self.commands.submit(command) {
                Ok(()) => info!(device = %device, method = %action.method, "safety command enqueued"),
                Err(err) => {
                    error!(%err, device = %device, method = %action.method, "failed to enqueue safety command");
                    self.sink.log(
                        "error",
                        "lease",
                        format!("safety command {}.{} lost: {err}", device, action.method),
                    );
                }
            }
        }
    }
}
