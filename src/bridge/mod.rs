//! Command/Event Bridge
//!
//! Two bounded channels join the cooperative network domain and the
//! blocking hardware domain. Commands flow network -> hardware through a
//! queue drained by exactly one worker thread; property changes and RPC
//! responses flow hardware -> network through a queue drained by exactly
//! one publisher task. Producers on either side only ever attempt a
//! non-blocking enqueue, so neither domain can stall the other.

mod publisher;
mod worker;

pub use publisher::Publisher;
pub use worker::Worker;

use gatekeeper_shared::{idents, now_ms, AuditRecord, LogRecord, Response, TelemetryPayload};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A validated actuation request on its way to the hardware worker.
/// Immutable once enqueued.
#[derive(Debug, Clone)]
pub struct Command {
    pub device: String,
    pub method: String,
    pub args: Vec<Value>,
    pub client_id: String,
    pub correlation_id: Option<String>,
    pub response_topic: Option<String>,
    pub enqueued_at_ms: u64,
}

impl Command {
    pub fn new(
        device: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
        client_id: impl Into<String>,
        correlation_id: Option<String>,
        response_topic: Option<String>,
    ) -> Self {
        Self {
            device: device.into(),
            method: method.into(),
            args,
            client_id: client_id.into(),
            correlation_id,
            response_topic,
            enqueued_at_ms: now_ms(),
        }
    }

    /// Synthetic safety command injected by the lease manager.
    /// Carries the reserved system identity and expects no response.
    pub fn safety(device: impl Into<String>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self::new(device, method, args, idents::SYSTEM_CLIENT, None, None)
    }
}

/// A property change observed on the hardware side
#[derive(Debug, Clone)]
pub struct HardwareEvent {
    pub device: String,
    pub property: String,
    pub value: Value,
    pub timestamp_ms: u64,
}

impl HardwareEvent {
    pub fn new(device: impl Into<String>, property: impl Into<String>, value: Value) -> Self {
        Self {
            device: device.into(),
            property: property.into(),
            value,
            timestamp_ms: now_ms(),
        }
    }
}

/// Everything that travels the outbound channel towards the bus
#[derive(Debug)]
pub enum Outbound {
    /// Retained device state update
    State(HardwareEvent),
    /// RPC response envelope. `tracked` responses pass the correlation
    /// registry's exactly-once gate before publication.
    Response {
        topic: String,
        response: Response,
        tracked: bool,
    },
    /// Access-control decision record
    Audit(AuditRecord),
    /// System log record
    Log(LogRecord),
    /// Periodic health snapshot
    Telemetry(TelemetryPayload),
}

/// Back-pressure signal from a bounded enqueue attempt
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("queue is at capacity")]
    QueueFull,

    #[error("receiving side has stopped")]
    Closed,
}

fn map_send_error<T>(err: mpsc::error::TrySendError<T>) -> SubmitError {
    match err {
        mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull,
        mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
    }
}

/// Handle for enqueueing commands towards the worker thread
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
}

impl CommandSender {
    /// Non-blocking submit. A full queue is surfaced synchronously; the
    /// caller decides whether that is a transient error worth reporting.
    pub fn submit(&self, command: Command) -> Result<(), SubmitError> {
        debug!(
            device = %command.device,
            method = %command.method,
            client = %command.client_id,
            "command submitted"
        );
        self.tx.try_send(command).map_err(map_send_error)
    }
}

/// Handle for enqueueing outbound traffic towards the publisher task.
///
/// Safe to use from any execution context; never blocks and never calls
/// into publication logic directly.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Outbound>,
}

impl EventSink {
    /// Hand off a hardware event. Events are at-most-once: the caller is
    /// told about an overflowing queue but there is no retry.
    pub fn state(&self, event: HardwareEvent) -> Result<(), SubmitError> {
        self.tx.try_send(Outbound::State(event)).map_err(map_send_error)
    }

    /// Hand off an RPC response subject to the exactly-once gate
    pub fn respond(&self, topic: impl Into<String>, response: Response) -> Result<(), SubmitError> {
        self.tx
            .try_send(Outbound::Response {
                topic: topic.into(),
                response,
                tracked: true,
            })
            .map_err(map_send_error)
    }

    /// Hand off a response for a request that never got a correlation
    /// entry (validation failures)
    pub fn respond_untracked(
        &self,
        topic: impl Into<String>,
        response: Response,
    ) -> Result<(), SubmitError> {
        self.tx
            .try_send(Outbound::Response {
                topic: topic.into(),
                response,
                tracked: false,
            })
            .map_err(map_send_error)
    }

    /// Best-effort audit record
    pub fn audit(&self, record: AuditRecord) {
        if self.tx.try_send(Outbound::Audit(record)).is_err() {
            warn!("outbound queue full, dropping audit record");
        }
    }

    /// Best-effort system log record
    pub fn log(&self, level: &str, module: &str, message: impl Into<String>) {
        let record = LogRecord::new(level, module, message);
        if self.tx.try_send(Outbound::Log(record)).is_err() {
            warn!("outbound queue full, dropping log record");
        }
    }

    /// Best-effort telemetry snapshot
    pub fn telemetry(&self, payload: TelemetryPayload) {
        if self.tx.try_send(Outbound::Telemetry(payload)).is_err() {
            warn!("outbound queue full, dropping telemetry");
        }
    }
}

/// Create the bounded channel pair joining the two concurrency domains
pub fn channels(
    command_capacity: usize,
    event_capacity: usize,
) -> (
    CommandSender,
    mpsc::Receiver<Command>,
    EventSink,
    mpsc::Receiver<Outbound>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(command_capacity);
    let (out_tx, out_rx) = mpsc::channel(event_capacity);
    (
        CommandSender { tx: cmd_tx },
        cmd_rx,
        EventSink { tx: out_tx },
        out_rx,
    )
}

/// Sink wired to a bare receiver, for exercising producers in isolation
#[cfg(test)]
pub fn test_sink(capacity: usize) -> (EventSink, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSink { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submit_backpressure() {
        let (commands, _cmd_rx, _sink, _out_rx) = channels(2, 8);

        commands
            .submit(Command::new("led1", "on", vec![], "a", None, None))
            .unwrap();
        commands
            .submit(Command::new("led1", "off", vec![], "a", None, None))
            .unwrap();

        let err = commands
            .submit(Command::new("led1", "toggle", vec![], "a", None, None))
            .unwrap_err();
        assert_eq!(err, SubmitError::QueueFull);
    }

    #[test]
    fn test_submit_after_worker_gone() {
        let (commands, cmd_rx, _sink, _out_rx) = channels(2, 8);
        drop(cmd_rx);

        let err = commands
            .submit(Command::new("led1", "on", vec![], "a", None, None))
            .unwrap_err();
        assert_eq!(err, SubmitError::Closed);
    }

    #[test]
    fn test_safety_command_identity() {
        let cmd = Command::safety("motor1", "stop", vec![]);
        assert_eq!(cmd.client_id, idents::SYSTEM_CLIENT);
        assert!(cmd.correlation_id.is_none());
        assert!(cmd.response_topic.is_none());
    }

    #[test]
    fn test_sink_overflow_reports_synchronously() {
        let (sink, _rx) = test_sink(1);
        sink.state(HardwareEvent::new("led1", "power", json!(true)))
            .unwrap();
        let err = sink
            .state(HardwareEvent::new("led1", "power", json!(false)))
            .unwrap_err();
        assert_eq!(err, SubmitError::QueueFull);
    }
}
