//! DC motor device model

use super::{Device, DeviceError, MethodSpec, Notifier};
use crate::bridge::EventSink;
use serde_json::{json, Value};

const METHODS: &[MethodSpec] = &[
    MethodSpec::mutating("forward"),
    MethodSpec::mutating("backward"),
    MethodSpec::mutating("stop"),
    MethodSpec::read_only("value"),
];

/// Two-pin H-bridge motor. The `value` property is the signed drive level:
/// positive forward, negative backward, zero stopped.
pub struct Motor {
    forward_pin: u8,
    backward_pin: u8,
    value: f64,
    notify: Option<Notifier>,
}

impl Motor {
    pub fn new(forward_pin: u8, backward_pin: u8) -> Self {
        Self {
            forward_pin,
            backward_pin,
            value: 0.0,
            notify: None,
        }
    }

    fn speed_arg(args: &[Value]) -> Result<f64, DeviceError> {
        let speed = match args.first() {
            None => 1.0,
            Some(v) => v.as_f64().ok_or_else(|| {
                DeviceError::InvalidArgs(format!("speed must be a number, got {v}"))
            })?,
        };
        if !(0.0..=1.0).contains(&speed) {
            return Err(DeviceError::InvalidArgs(format!(
                "speed must be within 0.0..=1.0, got {speed}"
            )));
        }
        Ok(speed)
    }

    fn drive(&mut self, value: f64) -> Value {
        if (self.value - value).abs() > f64::EPSILON {
            self.value = value;
            if let Some(notify) = &self.notify {
                notify.emit("value", json!(self.value));
            }
        }
        json!(self.value)
    }
}

impl Device for Motor {
    fn kind(&self) -> &'static str {
        "motor"
    }

    fn pins(&self) -> Vec<u8> {
        vec![self.forward_pin, self.backward_pin]
    }

    fn methods(&self) -> &'static [MethodSpec] {
        METHODS
    }

    fn attach_sink(&mut self, device_id: &str, sink: EventSink) {
        self.notify = Some(Notifier::new(device_id, sink));
    }

    fn invoke(&mut self, method: &str, args: &[Value]) -> Result<Value, DeviceError> {
        match method {
            "forward" => {
                let speed = Self::speed_arg(args)?;
                Ok(self.drive(speed))
            }
            "backward" => {
                let speed = Self::speed_arg(args)?;
                Ok(self.drive(-speed))
            }
            "stop" => Ok(self.drive(0.0)),
            "value" => Ok(json!(self.value)),
            other => Err(DeviceError::UnknownMethod(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_backward_stop() {
        let mut motor = Motor::new(4, 14);
        assert_eq!(motor.invoke("forward", &[json!(0.5)]).unwrap(), json!(0.5));
        assert_eq!(motor.invoke("backward", &[]).unwrap(), json!(-1.0));
        assert_eq!(motor.invoke("stop", &[]).unwrap(), json!(0.0));
    }

    #[test]
    fn test_rejects_bad_speed() {
        let mut motor = Motor::new(4, 14);
        assert!(matches!(
            motor.invoke("forward", &[json!(1.5)]),
            Err(DeviceError::InvalidArgs(_))
        ));
        assert!(matches!(
            motor.invoke("forward", &[json!("fast")]),
            Err(DeviceError::InvalidArgs(_))
        ));
    }
}
