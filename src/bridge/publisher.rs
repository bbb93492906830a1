//! Outbound publication loop
//!
//! Exactly one task drains the outbound channel, so events are published
//! in handoff order. Tracked RPC responses pass through the correlation
//! registry here, which is what makes the exactly-one-response guarantee
//! hold no matter which component produced the response.

use super::Outbound;
use crate::rpc::CorrelationRegistry;
use crate::transport::{BusMessage, MessageBus};
use gatekeeper_shared::{codec, topics, DeviceStatePayload};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct Publisher {
    rx: mpsc::Receiver<Outbound>,
    bus: Arc<dyn MessageBus>,
    correlations: Arc<CorrelationRegistry>,
}

impl Publisher {
    pub fn new(
        rx: mpsc::Receiver<Outbound>,
        bus: Arc<dyn MessageBus>,
        correlations: Arc<CorrelationRegistry>,
    ) -> Self {
        Self {
            rx,
            bus,
            correlations,
        }
    }

    pub async fn run(mut self) {
        info!("event publisher started");
        while let Some(item) = self.rx.recv().await {
            if let Err(err) = self.dispatch(item).await {
                warn!(%err, "publication failed");
            }
        }
        info!("event publisher stopped");
    }

    async fn dispatch(&self, item: Outbound) -> anyhow::Result<()> {
        let msg = match item {
            Outbound::State(event) => {
                let payload = codec::encode(&DeviceStatePayload::new(
                    event.property,
                    event.value,
                    event.timestamp_ms,
                ))?;
                BusMessage::retained(topics::device_state(&event.device), payload)
            }
            Outbound::Response {
                topic,
                response,
                tracked,
            } => {
                if tracked && self.correlations.complete(&response.correlation_id).is_none() {
                    debug!(
                        correlation = %response.correlation_id,
                        "suppressing duplicate or late response"
                    );
                    return Ok(());
                }
                BusMessage::transient(topic, codec::encode(&response)?)
            }
            Outbound::Audit(record) => {
                BusMessage::transient(topics::AUDIT_LOG, codec::encode(&record)?)
            }
            Outbound::Log(record) => {
                let topic = topics::system_log(&record.level);
                BusMessage::transient(topic, codec::encode(&record)?)
            }
            Outbound::Telemetry(payload) => {
                BusMessage::transient(topics::TELEMETRY, codec::encode(&payload)?)
            }
        };
        self.bus.publish(msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{self, HardwareEvent};
    use crate::transport::LocalBus;
    use gatekeeper_shared::{now_ms, Response};
    use serde_json::json;

    struct Fixture {
        sink: bridge::EventSink,
        bus: Arc<LocalBus>,
        correlations: Arc<CorrelationRegistry>,
    }

    async fn start_publisher() -> Fixture {
        let (_commands, _cmd_rx, sink, out_rx) = bridge::channels(8, 64);
        let bus = Arc::new(LocalBus::new());
        let correlations = Arc::new(CorrelationRegistry::new());
        tokio::spawn(Publisher::new(out_rx, bus.clone(), correlations.clone()).run());
        Fixture {
            sink,
            bus,
            correlations,
        }
    }

    #[tokio::test]
    async fn test_state_event_published_retained() {
        let fx = start_publisher().await;
        let mut rx = fx.bus.subscribe("pi/devices/+/state").await.unwrap();

        fx.sink
            .state(HardwareEvent::new("led1", "power", json!(true)))
            .unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "pi/devices/led1/state");
        assert!(msg.retain);
        let payload: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(payload["property"], "power");
        assert_eq!(payload["value"], true);
    }

    #[tokio::test]
    async fn test_tracked_response_published_once() {
        let fx = start_publisher().await;
        let mut rx = fx.bus.subscribe("pi/rpc/responses/+").await.unwrap();

        fx.correlations
            .register("c1", "pi/rpc/responses/a", now_ms());
        fx.sink
            .respond("pi/rpc/responses/a", Response::ok("c1", json!(1)))
            .unwrap();
        fx.sink
            .respond("pi/rpc/responses/a", Response::ok("c1", json!(2)))
            .unwrap();
        // A second, distinct correlation proves the loop is still alive
        fx.correlations
            .register("c2", "pi/rpc/responses/a", now_ms());
        fx.sink
            .respond("pi/rpc/responses/a", Response::ok("c2", json!(3)))
            .unwrap();

        let first: Response = serde_json::from_slice(&rx.recv().await.unwrap().payload).unwrap();
        let second: Response = serde_json::from_slice(&rx.recv().await.unwrap().payload).unwrap();
        assert_eq!(first.correlation_id, "c1");
        assert_eq!(second.correlation_id, "c2");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_untracked_response_bypasses_registry() {
        let fx = start_publisher().await;
        let mut rx = fx.bus.subscribe("pi/rpc/responses/+").await.unwrap();

        fx.sink
            .respond_untracked(
                "pi/rpc/responses/a",
                Response::error("", "missing correlation_id"),
            )
            .unwrap();

        let msg = rx.recv().await.unwrap();
        let response: Response = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(response.error.as_deref(), Some("missing correlation_id"));
    }

    #[tokio::test]
    async fn test_log_record_routes_by_level() {
        let fx = start_publisher().await;
        let mut rx = fx.bus.subscribe("pi/logs/system/error").await.unwrap();

        fx.sink.log("error", "bridge::worker", "it broke");
        fx.sink.log("info", "bridge::worker", "all fine");

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "pi/logs/system/error");
        assert!(rx.try_recv().is_err());
    }
}
