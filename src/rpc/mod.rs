//! RPC correlation layer
//!
//! Decodes inbound request envelopes, validates them, and routes each one:
//! lease operations are answered directly, read-only queries go straight
//! to the bridge, and every other command must pass lease admission first.
//! Each accepted request gets exactly one response, enforced by the
//! correlation registry that the publisher consults before releasing a
//! response envelope.

mod correlation;

pub use correlation::{CorrelationEntry, CorrelationRegistry};

use crate::bridge::{Command, CommandSender, EventSink};
use crate::devices::Catalog;
use crate::lease::{Admission, LeaseManager, LeaseRefused};
use gatekeeper_shared::{codec, idents, now_ms, AuditRecord, CommandRequest, Response};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// A request that passed field validation
struct ValidRequest {
    device: String,
    method: String,
    args: Vec<Value>,
    correlation_id: String,
    client_id: String,
    response_topic: String,
}

/// A request rejected before dispatch
struct Rejection {
    reason: String,
    correlation_id: String,
    response_topic: Option<String>,
}

enum LeaseOpError {
    Refused(LeaseRefused),
    Invalid(String),
}

impl From<LeaseRefused> for LeaseOpError {
    fn from(refused: LeaseRefused) -> Self {
        Self::Refused(refused)
    }
}

pub struct RpcHandler {
    catalog: Arc<Catalog>,
    leases: Arc<LeaseManager>,
    commands: CommandSender,
    sink: EventSink,
    correlations: Arc<CorrelationRegistry>,
}

impl RpcHandler {
    pub fn new(
        catalog: Arc<Catalog>,
        leases: Arc<LeaseManager>,
        commands: CommandSender,
        sink: EventSink,
        correlations: Arc<CorrelationRegistry>,
    ) -> Self {
        Self {
            catalog,
            leases,
            commands,
            sink,
            correlations,
        }
    }

    /// Process one raw payload from the command topic
    pub async fn handle_inbound(&self, payload: &[u8]) {
        let request = match codec::decode_command(payload) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "dropping malformed request");
                return;
            }
        };

        let request = match validate(request) {
            Ok(request) => request,
            Err(rejection) => {
                warn!(reason = %rejection.reason, "rejecting invalid request");
                if let Some(topic) = rejection.response_topic {
                    let _ = self.sink.respond_untracked(
                        topic,
                        Response::error(rejection.correlation_id, rejection.reason),
                    );
                }
                return;
            }
        };

        // Registering first is what makes one-response-per-token hold:
        // a duplicate in-flight id must not produce a second envelope.
        if !self
            .correlations
            .register(&request.correlation_id, &request.response_topic, now_ms())
        {
            warn!(
                correlation = %request.correlation_id,
                client = %request.client_id,
                "duplicate in-flight correlation id, dropping request"
            );
            return;
        }

        if request.device == idents::LEASE_DEVICE {
            self.handle_lease_op(request).await;
            return;
        }

        if self.catalog.is_read_only(&request.device, &request.method) {
            debug!(device = %request.device, method = %request.method, "read-only query bypasses lease gate");
        } else {
            match self.leases.admit(&request.client_id, &request.device).await {
                Admission::Denied { holder } => {
                    self.sink.audit(AuditRecord::new(
                        &request.client_id,
                        &request.device,
                        &request.method,
                        "denied",
                    ));
                    let _ = self.sink.respond(
                        request.response_topic,
                        Response::denied(
                            request.correlation_id,
                            format!("resource is leased by {holder}"),
                        ),
                    );
                    return;
                }
                Admission::Admitted => {
                    self.sink.audit(AuditRecord::new(
                        &request.client_id,
                        &request.device,
                        &request.method,
                        "admitted",
                    ));
                }
            }
        }

        let command = Command::new(
            request.device,
            request.method,
            request.args,
            request.client_id,
            Some(request.correlation_id.clone()),
            Some(request.response_topic.clone()),
        );
        if let Err(err) = self.commands.submit(command) {
            warn!(%err, "bridge rejected command");
            let _ = self.sink.respond(
                request.response_topic,
                Response::error(
                    request.correlation_id,
                    format!("temporarily unavailable: {err}"),
                ),
            );
        }
    }

    /// Lease operations are answered in place; they never enter the bridge
    async fn handle_lease_op(&self, request: ValidRequest) {
        let response = match self.lease_call(&request).await {
            Ok(result) => Response::ok(request.correlation_id, result),
            Err(LeaseOpError::Refused(refused)) => {
                Response::denied(request.correlation_id, refused.to_string())
            }
            Err(LeaseOpError::Invalid(reason)) => {
                Response::error(request.correlation_id, reason)
            }
        };
        let _ = self.sink.respond(request.response_topic, response);
    }

    async fn lease_call(&self, request: &ValidRequest) -> Result<Value, LeaseOpError> {
        let resource = request
            .args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| {
                LeaseOpError::Invalid("first argument must be the resource id".into())
            })?;

        match request.method.as_str() {
            "grant" => {
                let ttl_ms = match request.args.get(1) {
                    None | Some(Value::Null) => None,
                    Some(value) => Some(value.as_u64().map(|secs| secs * 1_000).ok_or_else(
                        || {
                            LeaseOpError::Invalid(
                                "ttl must be an integer number of seconds".into(),
                            )
                        },
                    )?),
                };
                let lease = self
                    .leases
                    .grant(&request.client_id, resource, ttl_ms)
                    .await?;
                Ok(lease_view(&lease))
            }
            "renew" => {
                let lease = self.leases.renew(&request.client_id, resource).await?;
                Ok(lease_view(&lease))
            }
            "release" => {
                self.leases.release(&request.client_id, resource).await?;
                Ok(json!({ "resource": resource, "released": true }))
            }
            "override" => {
                self.leases
                    .override_release(&request.client_id, resource)
                    .await?;
                Ok(json!({ "resource": resource, "overridden": true }))
            }
            other => Err(LeaseOpError::Invalid(format!(
                "unknown lease operation: {other}"
            ))),
        }
    }
}

fn lease_view(lease: &crate::lease::Lease) -> Value {
    json!({
        "resource": lease.resource,
        "holder": lease.holder,
        "granted_at_ms": lease.granted_at_ms,
        "ttl_ms": lease.ttl_ms,
        "expires_at_ms": lease.expires_at_ms(),
    })
}

fn validate(request: CommandRequest) -> Result<ValidRequest, Rejection> {
    let correlation_id = request.correlation_id.unwrap_or_default();
    let response_topic = request.response_topic.filter(|topic| !topic.is_empty());
    let client_id = request.client_id.unwrap_or_default();

    let mut missing = Vec::new();
    if request.device.is_empty() {
        missing.push("device");
    }
    if request.method.is_empty() {
        missing.push("method");
    }
    if correlation_id.is_empty() {
        missing.push("correlation_id");
    }
    if client_id.is_empty() {
        missing.push("client_id");
    }
    if response_topic.is_none() {
        missing.push("response_topic");
    }

    if !missing.is_empty() {
        return Err(Rejection {
            reason: format!("missing required fields: {}", missing.join(", ")),
            correlation_id,
            response_topic,
        });
    }

    if client_id == idents::SYSTEM_CLIENT {
        return Err(Rejection {
            reason: "client_id is reserved".into(),
            correlation_id,
            response_topic,
        });
    }

    Ok(ValidRequest {
        device: request.device,
        method: request.method,
        args: request.args,
        correlation_id,
        client_id,
        // checked above
        response_topic: response_topic.unwrap_or_default(),
    })
}
