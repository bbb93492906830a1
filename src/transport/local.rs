//! In-process message bus
//!
//! Stands in for the embedded broker: topic-based fan-out, retained-message
//! redelivery on subscribe, and last-will delivery on close. Subscribers
//! that fall behind their channel capacity lose messages (at-most-once),
//! matching what a QoS-0 broker link gives us.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::traits::{BusMessage, MessageBus};
use std::collections::HashMap;

/// Per-subscriber delivery queue capacity
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Check a topic against an MQTT-style filter (`+` single level, `#` tail)
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

struct Subscriber {
    filter: String,
    tx: mpsc::Sender<BusMessage>,
}

#[derive(Default)]
struct Inner {
    retained: HashMap<String, BusMessage>,
    subscribers: Vec<Subscriber>,
    will: Option<BusMessage>,
    closed: bool,
}

/// In-process pub/sub bus
#[derive(Default)]
pub struct LocalBus {
    inner: Mutex<Inner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn fanout(subscribers: &mut Vec<Subscriber>, msg: &BusMessage) {
        subscribers.retain(|sub| {
            if !topic_matches(&sub.filter, &msg.topic) {
                return !sub.tx.is_closed();
            }
            match sub.tx.try_send(msg.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(topic = %msg.topic, filter = %sub.filter, "slow subscriber, dropping message");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, msg: BusMessage) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            anyhow::bail!("bus is closed");
        }
        if msg.retain {
            inner.retained.insert(msg.topic.clone(), msg.clone());
        }
        Self::fanout(&mut inner.subscribers, &msg);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<mpsc::Receiver<BusMessage>> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            anyhow::bail!("bus is closed");
        }
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);

        // Retained snapshot first, then live traffic
        for msg in inner.retained.values() {
            if topic_matches(filter, &msg.topic) {
                let _ = tx.try_send(msg.clone());
            }
        }

        inner.subscribers.push(Subscriber {
            filter: filter.to_string(),
            tx,
        });
        debug!(filter, "subscriber registered");
        Ok(rx)
    }

    async fn set_will(&self, msg: BusMessage) {
        self.inner.lock().await.will = Some(msg);
    }

    async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        inner.closed = true;
        if let Some(will) = inner.will.take() {
            if will.retain {
                inner.retained.insert(will.topic.clone(), will.clone());
            }
            Self::fanout(&mut inner.subscribers, &will);
        }
        inner.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matching() {
        assert!(topic_matches("pi/status", "pi/status"));
        assert!(topic_matches("pi/devices/+/state", "pi/devices/led1/state"));
        assert!(topic_matches("pi/#", "pi/devices/led1/state"));
        assert!(topic_matches("#", "anything/at/all"));

        assert!(!topic_matches("pi/status", "pi/devices"));
        assert!(!topic_matches("pi/devices/+/state", "pi/devices/led1/extra/state"));
        assert!(!topic_matches("pi/devices/+", "pi/devices/led1/state"));
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscriber() {
        let bus = LocalBus::new();
        let mut rx = bus.subscribe("pi/devices/+/state").await.unwrap();

        bus.publish(BusMessage::transient("pi/devices/led1/state", &b"{}"[..]))
            .await
            .unwrap();
        bus.publish(BusMessage::transient("pi/status", &b"online"[..]))
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "pi/devices/led1/state");
        assert!(rx.try_recv().is_err(), "non-matching topic must not be delivered");
    }

    #[tokio::test]
    async fn test_retained_message_redelivered_on_subscribe() {
        let bus = LocalBus::new();
        bus.publish(BusMessage::retained("pi/status", &b"online"[..]))
            .await
            .unwrap();

        let mut rx = bus.subscribe("pi/status").await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(&msg.payload[..], b"online");
        assert!(msg.retain);
    }

    #[tokio::test]
    async fn test_retained_message_is_replaced() {
        let bus = LocalBus::new();
        bus.publish(BusMessage::retained("pi/status", &b"online"[..]))
            .await
            .unwrap();
        bus.publish(BusMessage::retained("pi/status", &b"offline"[..]))
            .await
            .unwrap();

        let mut rx = bus.subscribe("pi/status").await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(&msg.payload[..], b"offline");
    }

    #[tokio::test]
    async fn test_will_delivered_on_close() {
        let bus = LocalBus::new();
        bus.set_will(BusMessage::retained("pi/status", &b"offline"[..]))
            .await;
        let mut rx = bus.subscribe("pi/status").await.unwrap();

        bus.close().await;

        let msg = rx.recv().await.unwrap();
        assert_eq!(&msg.payload[..], b"offline");
    }

    #[tokio::test]
    async fn test_publish_after_close_fails() {
        let bus = LocalBus::new();
        bus.close().await;
        assert!(bus
            .publish(BusMessage::transient("pi/status", &b"online"[..]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delivery_order_per_topic() {
        let bus = LocalBus::new();
        let mut rx = bus.subscribe("pi/devices/led1/state").await.unwrap();

        for i in 0..5u8 {
            bus.publish(BusMessage::transient(
                "pi/devices/led1/state",
                vec![i],
            ))
            .await
            .unwrap();
        }

        for i in 0..5u8 {
            assert_eq!(rx.recv().await.unwrap().payload[0], i);
        }
    }
}
