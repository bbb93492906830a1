//! Device registry adapter
//!
//! This module maps `(device id, method name)` to bound operations on soft
//! device models. Dispatch is by explicit method tables populated at
//! configuration time; unknown names are rejected rather than resolved
//! dynamically. Real pin I/O lives behind these models and is supplied by
//! the platform's pin factory at deployment.

pub mod button;
pub mod led;
pub mod motor;
mod registry;

pub use button::{Button, ButtonTrigger};
pub use led::Led;
pub use motor::Motor;
pub use registry::{Catalog, DeviceRegistry, RegistryError};

use crate::bridge::{EventSink, HardwareEvent};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Errors a device can raise during invocation
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("hardware fault: {0}")]
    Fault(String),
}

/// Whether a method mutates observable device state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    ReadOnly,
    Mutating,
}

/// One entry in a device's method table
#[derive(Debug, Clone, Copy)]
pub struct MethodSpec {
    pub name: &'static str,
    pub kind: MethodKind,
}

impl MethodSpec {
    pub const fn read_only(name: &'static str) -> Self {
        Self {
            name,
            kind: MethodKind::ReadOnly,
        }
    }

    pub const fn mutating(name: &'static str) -> Self {
        Self {
            name,
            kind: MethodKind::Mutating,
        }
    }
}

/// An addressable actuator/sensor exposing named methods and
/// property-change notifications.
///
/// `invoke` is called only from the bridge's single worker thread, so
/// implementations need no internal locking for command execution. Property
/// changes triggered from other threads (input interrupts) go through a
/// separately held [`Notifier`].
pub trait Device: Send {
    /// Device type name as published in the registry map
    fn kind(&self) -> &'static str;

    /// GPIO pins the device is wired to
    fn pins(&self) -> Vec<u8>;

    /// The fixed set of callable methods
    fn methods(&self) -> &'static [MethodSpec];

    /// Hand the device its identity and the event handoff channel
    fn attach_sink(&mut self, device_id: &str, sink: EventSink);

    /// Invoke a named method with positional arguments
    fn invoke(&mut self, method: &str, args: &[Value]) -> Result<Value, DeviceError>;
}

/// Property-change notifier bound to one device id.
///
/// Safe to call from any thread; the handoff never blocks. An event that
/// does not fit the queue is dropped (at-most-once) and logged.
#[derive(Clone)]
pub struct Notifier {
    device_id: String,
    sink: EventSink,
}

impl Notifier {
    pub fn new(device_id: impl Into<String>, sink: EventSink) -> Self {
        Self {
            device_id: device_id.into(),
            sink,
        }
    }

    /// Emit a property change into the bridge's outbound path
    pub fn emit(&self, property: &str, value: Value) {
        let event = HardwareEvent::new(&self.device_id, property, value);
        if self.sink.state(event).is_err() {
            warn!(
                device = %self.device_id,
                property,
                "event queue full, dropping property change"
            );
        }
    }
}
