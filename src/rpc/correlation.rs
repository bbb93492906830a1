//! Outstanding request tracking
//!
//! One entry per in-flight correlation id. `register` is the only way in
//! and `complete` is the only way out, so at most one response can ever be
//! released for a given id.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct CorrelationEntry {
    pub response_topic: String,
    pub created_at_ms: u64,
}

#[derive(Default)]
pub struct CorrelationRegistry {
    inner: Mutex<HashMap<String, CorrelationEntry>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new outstanding request. Returns false if the id is already
    /// in flight, in which case the caller must not dispatch the request.
    pub fn register(&self, id: &str, response_topic: &str, now_ms: u64) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.contains_key(id) {
            return false;
        }
        inner.insert(
            id.to_string(),
            CorrelationEntry {
                response_topic: response_topic.to_string(),
                created_at_ms: now_ms,
            },
        );
        true
    }

    /// Take the entry for a request that is being answered. `None` means
    /// the id was already answered, pruned, or never registered.
    pub fn complete(&self, id: &str) -> Option<CorrelationEntry> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(id)
    }

    /// Drop entries older than the given horizon. A response arriving for
    /// a pruned entry is suppressed by the publisher.
    pub fn prune_stale(&self, now_ms: u64, max_age_ms: u64) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = inner.len();
        inner.retain(|_, entry| now_ms.saturating_sub(entry.created_at_ms) <= max_age_ms);
        before - inner.len()
    }

    pub fn outstanding(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_complete_cycle() {
        let registry = CorrelationRegistry::new();
        assert!(registry.register("c1", "pi/rpc/responses/a", 1_000));

        let entry = registry.complete("c1").expect("entry should exist");
        assert_eq!(entry.response_topic, "pi/rpc/responses/a");

        assert!(registry.complete("c1").is_none(), "second take must fail");
    }

    #[test]
    fn test_duplicate_in_flight_id_rejected() {
        let registry = CorrelationRegistry::new();
        assert!(registry.register("c1", "pi/rpc/responses/a", 1_000));
        assert!(!registry.register("c1", "pi/rpc/responses/b", 1_001));

        // Once completed the id may be reused
        registry.complete("c1");
        assert!(registry.register("c1", "pi/rpc/responses/b", 1_002));
    }

    #[test]
    fn test_prune_stale() {
        let registry = CorrelationRegistry::new();
        registry.register("old", "t", 1_000);
        registry.register("new", "t", 50_000);

        assert_eq!(registry.prune_stale(61_000, 60_000), 1);
        assert!(registry.complete("old").is_none());
        assert!(registry.complete("new").is_some());
    }
}
