//! Push-button input device model
//!
//! The pin interrupt fires on whatever thread the platform's pin factory
//! uses, so the trigger half is detached from the device and callable from
//! anywhere. Events reach the network domain only through the bounded
//! handoff channel held by the [`Notifier`].

use super::{Device, DeviceError, MethodSpec, Notifier};
use crate::bridge::EventSink;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

const METHODS: &[MethodSpec] = &[MethodSpec::read_only("is_pressed")];

#[derive(Default)]
struct Shared {
    pressed: bool,
    notify: Option<Notifier>,
}

/// Button device half; owned by the registry on the worker thread
pub struct Button {
    pin: u8,
    shared: Arc<Mutex<Shared>>,
}

/// Interrupt half; hand this to the pin factory (or a test thread)
#[derive(Clone)]
pub struct ButtonTrigger {
    shared: Arc<Mutex<Shared>>,
}

impl Button {
    pub fn new(pin: u8) -> (Self, ButtonTrigger) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            Self {
                pin,
                shared: shared.clone(),
            },
            ButtonTrigger { shared },
        )
    }
}

impl ButtonTrigger {
    pub fn press(&self) {
        self.edge(true);
    }

    pub fn release(&self) {
        self.edge(false);
    }

    fn edge(&self, pressed: bool) {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        if shared.pressed == pressed {
            return; // debounce repeated edges
        }
        shared.pressed = pressed;
        if let Some(notify) = &shared.notify {
            notify.emit("pressed", json!(pressed));
        }
    }
}

impl Device for Button {
    fn kind(&self) -> &'static str {
        "button"
    }

    fn pins(&self) -> Vec<u8> {
        vec![self.pin]
    }

    fn methods(&self) -> &'static [MethodSpec] {
        METHODS
    }

    fn attach_sink(&mut self, device_id: &str, sink: EventSink) {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.notify = Some(Notifier::new(device_id, sink));
    }

    fn invoke(&mut self, method: &str, _args: &[Value]) -> Result<Value, DeviceError> {
        match method {
            "is_pressed" => {
                let shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
                Ok(json!(shared.pressed))
            }
            other => Err(DeviceError::UnknownMethod(other.to_string())),
        }
    }
}
