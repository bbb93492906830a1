//! LED device model

use super::{Device, DeviceError, MethodSpec, Notifier};
use crate::bridge::EventSink;
use serde_json::{json, Value};

const METHODS: &[MethodSpec] = &[
    MethodSpec::mutating("on"),
    MethodSpec::mutating("off"),
    MethodSpec::mutating("toggle"),
    MethodSpec::read_only("is_lit"),
];

/// Single-pin LED. The `power` property tracks the driven pin level.
pub struct Led {
    pin: u8,
    lit: bool,
    notify: Option<Notifier>,
}

impl Led {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            lit: false,
            notify: None,
        }
    }

    fn set(&mut self, lit: bool) -> Value {
        if self.lit != lit {
            self.lit = lit;
            if let Some(notify) = &self.notify {
                notify.emit("power", json!(self.lit));
            }
        }
        json!(self.lit)
    }
}

impl Device for Led {
    fn kind(&self) -> &'static str {
        "led"
    }

    fn pins(&self) -> Vec<u8> {
        vec![self.pin]
    }

    fn methods(&self) -> &'static [MethodSpec] {
        METHODS
    }

    fn attach_sink(&mut self, device_id: &str, sink: EventSink) {
        self.notify = Some(Notifier::new(device_id, sink));
    }

    fn invoke(&mut self, method: &str, _args: &[Value]) -> Result<Value, DeviceError> {
        match method {
            "on" => Ok(self.set(true)),
            "off" => Ok(self.set(false)),
            "toggle" => Ok(self.set(!self.lit)),
            "is_lit" => Ok(json!(self.lit)),
            other => Err(DeviceError::UnknownMethod(other.to_string())),
        }
    }
}
