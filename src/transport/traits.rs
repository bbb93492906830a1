//! Bus trait abstraction for pluggable pub/sub backends
//!
//! The broker itself is an external collaborator: the daemon only relies on
//! topic-based delivery, retained-message redelivery and a last-will
//! announcement. A deployment adapter implements this trait against the
//! real broker; [`crate::transport::LocalBus`] implements it in-process.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// A single message on the bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

impl BusMessage {
    /// A message the broker keeps and redelivers to new subscribers
    pub fn retained(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: true,
        }
    }

    /// A fire-and-forget message
    pub fn transient(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }
}

/// Capability interface the daemon requires from the pub/sub transport
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a message; retained messages replace the topic's snapshot
    async fn publish(&self, msg: BusMessage) -> Result<()>;

    /// Subscribe to a topic filter (`+` and `#` wildcards supported).
    /// Matching retained messages are delivered before any live traffic.
    async fn subscribe(&self, filter: &str) -> Result<mpsc::Receiver<BusMessage>>;

    /// Register the message announced if this endpoint dies unexpectedly
    async fn set_will(&self, msg: BusMessage);

    /// Disconnect, announcing the registered will
    async fn close(&self);
}
