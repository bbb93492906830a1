//! Hardware worker loop
//!
//! Exactly one thread drains the command queue, so no two commands ever
//! run concurrently against the device registry and execution order is
//! first-accepted-first-executed. A failed invocation is reported to the
//! requester and the loop moves on; only channel closure ends it.

use super::{Command, EventSink};
use crate::devices::{DeviceRegistry, RegistryError};
use gatekeeper_shared::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct Worker {
    registry: DeviceRegistry,
    rx: mpsc::Receiver<Command>,
    sink: EventSink,
}

impl Worker {
    pub fn new(registry: DeviceRegistry, rx: mpsc::Receiver<Command>, sink: EventSink) -> Self {
        Self { registry, rx, sink }
    }

    /// Start the dedicated hardware thread. The thread exits when every
    /// command sender has been dropped.
    pub fn spawn(self) -> std::io::Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name("hardware-worker".into())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        info!("hardware worker started");
        while let Some(command) = self.rx.blocking_recv() {
            self.execute(command);
        }
        info!("hardware worker stopped");
    }

    fn execute(&mut self, command: Command) {
        debug!(
            device = %command.device,
            method = %command.method,
            client = %command.client_id,
            "executing command"
        );

        let outcome = self
            .registry
            .invoke(&command.device, &command.method, &command.args);

        let correlation_id = match &command.correlation_id {
            Some(id) => id.clone(),
            // Safety commands and other fire-and-forget traffic
            None => {
                if let Err(err) = &outcome {
                    warn!(device = %command.device, method = %command.method, %err, "uncorrelated command failed");
                    self.sink
                        .log("error", "bridge::worker", format!("{}.{}: {err}", command.device, command.method));
                }
                return;
            }
        };

        let response = match outcome {
            Ok(value) => Response::ok(correlation_id, value),
            Err(err) => {
                let message = match &err {
                    RegistryError::UnknownDevice(_) | RegistryError::UnknownMethod { .. } => {
                        format!("unknown target: {err}")
                    }
                    RegistryError::Device(_) => format!("execution failed: {err}"),
                };
                warn!(device = %command.device, method = %command.method, %err, "command failed");
                self.sink.log("error", "bridge::worker", message.clone());
                Response::error(correlation_id, message)
            }
        };

        if let Some(topic) = &command.response_topic {
            if let Err(err) = self.sink.respond(topic.clone(), response) {
                warn!(%err, "response lost: outbound queue unavailable");
            }
        }
    }
}
