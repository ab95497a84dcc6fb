// src/cache.rs
//! Short-TTL memoization of source display names, so bursts of events from
//! the same group do not hammer the transport's metadata lookup.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::transport::Transport;

/// Returned when the metadata lookup fails; never cached, so the next
/// resolve retries.
pub const UNKNOWN_SOURCE: &str = "Unknown group";

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub display_name: String,
    pub fetched_at: DateTime<Utc>,
}

pub struct MetaCache {
    transport: Arc<dyn Transport>,
    ttl: ChronoDuration,
    inner: Mutex<HashMap<String, CacheEntry>>,
}

impl MetaCache {
    pub fn new(transport: Arc<dyn Transport>, ttl_secs: u64) -> Self {
        Self {
            transport,
            ttl: ChronoDuration::seconds(ttl_secs as i64),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a source id to its display name. Expired entries are refetched
    /// in place; there is no eviction beyond expiry-on-read.
    pub async fn resolve(&self, source_id: &str) -> String {
        self.resolve_at(source_id, Utc::now()).await
    }

    pub(crate) async fn resolve_at(&self, source_id: &str, now: DateTime<Utc>) -> String {
        {
            let guard = self.inner.lock().expect("meta cache mutex poisoned");
            if let Some(entry) = guard.get(source_id) {
                if now.signed_duration_since(entry.fetched_at) < self.ttl {
                    return entry.display_name.clone();
                }
            }
        }

        match self.transport.fetch_metadata(source_id).await {
            Ok(meta) => {
                let mut guard = self.inner.lock().expect("meta cache mutex poisoned");
                guard.insert(
                    source_id.to_string(),
                    CacheEntry {
                        display_name: meta.display_name.clone(),
                        fetched_at: now,
                    },
                );
                meta.display_name
            }
            Err(e) => {
                tracing::warn!(source_id, error = ?e, "metadata lookup failed");
                UNKNOWN_SOURCE.to_string()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("meta cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[tokio::test]
    async fn hit_within_ttl_skips_the_transport() {
        let transport = Arc::new(MockTransport::new());
        transport.set_metadata("g1", "Rust Devs");
        let cache = MetaCache::new(transport.clone(), 300);

        assert_eq!(cache.resolve("g1").await, "Rust Devs");
        assert_eq!(cache.resolve("g1").await, "Rust Devs");
        assert_eq!(transport.metadata_calls(), 1);
    }

    #[tokio::test]
    async fn stale_entry_is_refetched() {
        let transport = Arc::new(MockTransport::new());
        transport.set_metadata("g1", "Rust Devs");
        let cache = MetaCache::new(transport.clone(), 300);

        let t0 = Utc::now();
        assert_eq!(cache.resolve_at("g1", t0).await, "Rust Devs");

        transport.set_metadata("g1", "Rust Devs (renamed)");
        // Still fresh: old name served from the cache.
        let t1 = t0 + ChronoDuration::seconds(299);
        assert_eq!(cache.resolve_at("g1", t1).await, "Rust Devs");
        // Past the TTL: refetched.
        let t2 = t0 + ChronoDuration::seconds(301);
        assert_eq!(cache.resolve_at("g1", t2).await, "Rust Devs (renamed)");
        assert_eq!(transport.metadata_calls(), 2);
    }

    #[tokio::test]
    async fn failures_yield_placeholder_and_are_not_cached() {
        let transport = Arc::new(MockTransport::new());
        // No metadata registered: every lookup fails.
        let cache = MetaCache::new(transport.clone(), 300);

        assert_eq!(cache.resolve("g9").await, UNKNOWN_SOURCE);
        assert!(cache.is_empty());

        // Once the transport knows the group, the next resolve succeeds.
        transport.set_metadata("g9", "Late Group");
        assert_eq!(cache.resolve("g9").await, "Late Group");
        assert_eq!(cache.len(), 1);
    }
}
