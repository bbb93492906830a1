//! Background lease expiry sweep
//!
//! Runs on a fixed interval, independent of request traffic, so an expiry
//! is detected at most one interval late. The sweep itself is idempotent.

use super::LeaseManager;
use gatekeeper_shared::now_ms;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::debug;

pub struct LeaseSweeper {
    manager: Arc<LeaseManager>,
    sweep_interval: Duration,
}

impl LeaseSweeper {
    pub fn new(manager: Arc<LeaseManager>, sweep_interval: Duration) -> Self {
        Self {
            manager,
            sweep_interval,
        }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.sweep_interval);
        loop {
            ticker.tick().await;
            let expired = self.manager.sweep(now_ms()).await;
            if !expired.is_empty() {
                debug!(count = expired.len(), "sweep cleared expired leases");
            }
        }
    }
}
