// src/store.rs
//! Gatekeeper between raw transport events and durable state. Owns message
//! filtering, per-source rate limiting, capacity-bounded retention, the
//! idempotent processed flag, and snapshot persistence.

use chrono::{DateTime, Utc};
use metrics::counter;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::{CuratorConfig, FilterConfig, ThrottleConfig};
use crate::model::{InboundEvent, StoredMessage};
use crate::persist;

/// Why an event was not admitted. Rejection is normal control flow, not an
/// error; nothing is mutated on any of these outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooShort,
    TooLong,
    MediaExcluded,
    ForwardedExcluded,
    SelfOriginated,
    Duplicate,
    RateLimited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Accepted { id: String },
    Rejected(Rejection),
}

impl AddOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AddOutcome::Accepted { .. })
    }
}

/// Ordered, capacity-bounded message sequence for one source.
#[derive(Debug, Default)]
pub struct SourceLedger {
    messages: VecDeque<StoredMessage>,
    accepted_total: u64,
    last_accept_at: Option<DateTime<Utc>>,
}

impl SourceLedger {
    /// Pure check against a caller-supplied `now`. Does NOT mutate state.
    fn rate_allows(&self, now: DateTime<Utc>, min_interval_ms: i64) -> bool {
        match self.last_accept_at {
            None => true,
            Some(last) => now.signed_duration_since(last).num_milliseconds() >= min_interval_ms,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceStat {
    pub count: usize,
    /// Monotonic count of every message ever accepted, eviction-proof.
    pub accepted: u64,
    /// Unix timestamp of the newest stored message.
    pub last_timestamp: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStats {
    pub total_messages: usize,
    pub sources: BTreeMap<String, SourceStat>,
}

/// Durable snapshot record; overwritten wholesale on every persist.
#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    last_updated: DateTime<Utc>,
    stats: StoreStats,
    messages: BTreeMap<String, Vec<StoredMessage>>,
}

pub struct MessageStore {
    filters: FilterConfig,
    throttle: ThrottleConfig,
    capacity: usize,
    min_interval_ms: i64,
    path: PathBuf,
    inner: Mutex<HashMap<String, SourceLedger>>,
    /// Pokes the curation listener after each accepted write. Set once at
    /// pipeline wiring; absent in unit tests.
    trigger: Mutex<Option<UnboundedSender<()>>>,
}

impl MessageStore {
    /// Build from config, restoring the last snapshot if one exists.
    pub fn new(cfg: &CuratorConfig) -> Self {
        let mut ledgers = HashMap::new();
        if let Some(snap) = persist::read_json::<StoreSnapshot>(&cfg.store_path) {
            for (source_id, messages) in snap.messages {
                let accepted_total = snap
                    .stats
                    .sources
                    .get(&source_id)
                    .map(|s| s.accepted)
                    .unwrap_or(messages.len() as u64);
                let ledger = SourceLedger {
                    accepted_total,
                    messages: messages.into(),
                    last_accept_at: None,
                };
                ledgers.insert(source_id, ledger);
            }
            tracing::info!(
                sources = ledgers.len(),
                path = %cfg.store_path.display(),
                "restored message store snapshot"
            );
        }
        Self {
            filters: cfg.filters.clone(),
            throttle: cfg.throttle.clone(),
            capacity: cfg.max_messages_per_source,
            min_interval_ms: cfg.min_accept_interval_ms(),
            path: cfg.store_path.clone(),
            inner: Mutex::new(ledgers),
            trigger: Mutex::new(None),
        }
    }

    pub fn set_curation_trigger(&self, tx: UnboundedSender<()>) {
        *self.trigger.lock().expect("store trigger mutex poisoned") = Some(tx);
    }

    /// Admit one event: filter, rate-limit, optionally delay, append with
    /// oldest-first eviction, persist, and poke the curation listener.
    pub async fn add_message(&self, event: &InboundEvent, source_name: &str) -> AddOutcome {
        let now = Utc::now();
        if let Some(rejection) = self.admit(event, now) {
            counter!("store_rejected_total").increment(1);
            tracing::debug!(id = %event.id, ?rejection, "event rejected");
            return AddOutcome::Rejected(rejection);
        }

        // Burst absorption, not correctness: pace accepted writes so the
        // pipeline does not mirror inbound bursts downstream.
        if self.throttle.human_delay {
            let ms = rand::rng()
                .random_range(self.throttle.delay_min_ms..=self.throttle.delay_max_ms);
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        }

        let message = StoredMessage::from_event(event, source_name, Utc::now());
        {
            let mut guard = self.inner.lock().expect("store mutex poisoned");
            let ledger = guard.entry(event.source_id.clone()).or_default();
            // The id may have landed while we were sleeping.
            if ledger.contains(&event.id) {
                return AddOutcome::Rejected(Rejection::Duplicate);
            }
            ledger.messages.push_back(message);
            while ledger.messages.len() > self.capacity {
                ledger.messages.pop_front();
            }
            ledger.accepted_total += 1;
        }
        counter!("store_accepted_total").increment(1);

        if let Err(e) = self.save() {
            // In-memory state is authoritative; the next successful persist
            // will include this write.
            tracing::error!(error = ?e, "store persist failed");
        }
        self.poke_curation();

        AddOutcome::Accepted {
            id: event.id.clone(),
        }
    }

    /// Filter + rate gate. On success the source's rate slot is stamped
    /// immediately, so concurrent arrivals cannot both pass the gate while
    /// one of them sits in the accept delay.
    fn admit(&self, event: &InboundEvent, now: DateTime<Utc>) -> Option<Rejection> {
        if let Some(rejection) = check_filters(event, &self.filters) {
            return Some(rejection);
        }
        let mut guard = self.inner.lock().expect("store mutex poisoned");
        let ledger = guard.entry(event.source_id.clone()).or_default();
        if ledger.contains(&event.id) {
            return Some(Rejection::Duplicate);
        }
        if !ledger.rate_allows(now, self.min_interval_ms) {
            return Some(Rejection::RateLimited);
        }
        ledger.last_accept_at = Some(now);
        None
    }

    fn poke_curation(&self) {
        if let Some(tx) = self
            .trigger
            .lock()
            .expect("store trigger mutex poisoned")
            .as_ref()
        {
            let _ = tx.send(());
        }
    }

    // --- Reads (independent of persistence timing) ---

    pub fn source_messages(&self, source_id: &str) -> Vec<StoredMessage> {
        let guard = self.inner.lock().expect("store mutex poisoned");
        guard
            .get(source_id)
            .map(|l| l.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_messages(&self) -> BTreeMap<String, Vec<StoredMessage>> {
        let guard = self.inner.lock().expect("store mutex poisoned");
        guard
            .iter()
            .map(|(id, l)| (id.clone(), l.messages.iter().cloned().collect()))
            .collect()
    }

    pub fn stats(&self) -> StoreStats {
        let guard = self.inner.lock().expect("store mutex poisoned");
        let mut sources = BTreeMap::new();
        let mut total = 0usize;
        for (id, ledger) in guard.iter() {
            total += ledger.messages.len();
            sources.insert(
                id.clone(),
                SourceStat {
                    count: ledger.messages.len(),
                    accepted: ledger.accepted_total,
                    last_timestamp: ledger.messages.back().map(|m| m.timestamp),
                },
            );
        }
        StoreStats {
            total_messages: total,
            sources,
        }
    }

    // --- Mutations from the operational surface ---

    /// Drop one source's ledger. Returns the number of removed messages.
    pub fn clear(&self, source_id: &str) -> usize {
        let removed = {
            let mut guard = self.inner.lock().expect("store mutex poisoned");
            guard
                .remove(source_id)
                .map(|l| l.messages.len())
                .unwrap_or(0)
        };
        if removed > 0 {
            if let Err(e) = self.save() {
                tracing::error!(error = ?e, "store persist failed after clear");
            }
        }
        removed
    }

    pub fn clear_all(&self) -> usize {
        let removed = {
            let mut guard = self.inner.lock().expect("store mutex poisoned");
            let n = guard.values().map(|l| l.messages.len()).sum();
            guard.clear();
            n
        };
        if let Err(e) = self.save() {
            tracing::error!(error = ?e, "store persist failed after clear_all");
        }
        removed
    }

    // --- Processed flag ---

    /// Flip `processed` for the given ids across all ledgers; idempotent.
    /// Returns how many messages actually transitioned.
    pub fn mark_processed(&self, ids: &[String]) -> usize {
        let now = Utc::now();
        let flipped = {
            let mut guard = self.inner.lock().expect("store mutex poisoned");
            let mut flipped = 0usize;
            for ledger in guard.values_mut() {
                for msg in ledger.messages.iter_mut() {
                    if !msg.meta.processed && ids.iter().any(|id| *id == msg.id) {
                        msg.meta.processed = true;
                        msg.meta.processed_at = Some(now);
                        flipped += 1;
                    }
                }
            }
            flipped
        };
        if flipped > 0 {
            if let Err(e) = self.save() {
                tracing::error!(error = ?e, "store persist failed after mark_processed");
            }
        }
        flipped
    }

    /// Cheap gate before a curation cycle.
    pub fn has_unprocessed(&self) -> bool {
        let guard = self.inner.lock().expect("store mutex poisoned");
        guard
            .values()
            .any(|l| l.messages.iter().any(|m| !m.meta.processed))
    }

    /// Flat candidate list for one curation batch, across all sources.
    pub fn unprocessed(&self) -> Vec<StoredMessage> {
        let guard = self.inner.lock().expect("store mutex poisoned");
        guard
            .values()
            .flat_map(|l| l.messages.iter().filter(|m| !m.meta.processed).cloned())
            .collect()
    }

    // --- Persistence ---

    /// Persist the full snapshot (atomic overwrite). Also the "save now"
    /// operational control.
    pub fn save(&self) -> std::io::Result<()> {
        let snapshot = {
            let guard = self.inner.lock().expect("store mutex poisoned");
            let mut messages = BTreeMap::new();
            let mut sources = BTreeMap::new();
            let mut total = 0usize;
            for (id, ledger) in guard.iter() {
                total += ledger.messages.len();
                sources.insert(
                    id.clone(),
                    SourceStat {
                        count: ledger.messages.len(),
                        accepted: ledger.accepted_total,
                        last_timestamp: ledger.messages.back().map(|m| m.timestamp),
                    },
                );
                messages.insert(id.clone(), ledger.messages.iter().cloned().collect());
            }
            StoreSnapshot {
                last_updated: Utc::now(),
                stats: StoreStats {
                    total_messages: total,
                    sources,
                },
                messages,
            }
        };
        persist::write_json_atomic(&self.path, &snapshot)
    }
}

fn check_filters(event: &InboundEvent, filters: &FilterConfig) -> Option<Rejection> {
    if event.from_self {
        return Some(Rejection::SelfOriginated);
    }
    if event.has_media && !filters.allow_media {
        return Some(Rejection::MediaExcluded);
    }
    if event.is_forwarded && !filters.allow_forwarded {
        return Some(Rejection::ForwardedExcluded);
    }
    let len = event.text.chars().count();
    if len < filters.min_text_len {
        return Some(Rejection::TooShort);
    }
    if len > filters.max_text_len {
        return Some(Rejection::TooLong);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn test_config(dir: &std::path::Path) -> CuratorConfig {
        let mut cfg = CuratorConfig::default();
        cfg.store_path = dir.join("messages.json");
        cfg.filters.min_text_len = 3;
        cfg
    }

    fn event(id: &str, source: &str, text: &str) -> InboundEvent {
        InboundEvent {
            id: id.into(),
            source_id: source.into(),
            sender_id: "u1".into(),
            sender_name: "Ada".into(),
            text: text.into(),
            has_media: false,
            is_forwarded: false,
            quoted_ref: None,
            timestamp: 1_700_000_000,
            from_self: false,
        }
    }

    #[test]
    fn filters_reject_without_touching_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::new(&test_config(dir.path()));

        let mut short = event("m1", "g1", "hi");
        assert_eq!(store.admit(&short, Utc::now()), Some(Rejection::TooShort));

        short.text = "x".repeat(5_000);
        assert_eq!(store.admit(&short, Utc::now()), Some(Rejection::TooLong));

        let mut media = event("m2", "g1", "a clip for you");
        media.has_media = true;
        assert_eq!(
            store.admit(&media, Utc::now()),
            Some(Rejection::MediaExcluded)
        );

        let mut own = event("m3", "g1", "note to self");
        own.from_self = true;
        assert_eq!(
            store.admit(&own, Utc::now()),
            Some(Rejection::SelfOriginated)
        );

        assert_eq!(store.stats().total_messages, 0);
    }

    #[test]
    fn forwarded_rejected_when_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.filters.allow_forwarded = false;
        let store = MessageStore::new(&cfg);

        let mut fwd = event("m1", "g1", "forwarded thing");
        fwd.is_forwarded = true;
        assert_eq!(
            store.admit(&fwd, Utc::now()),
            Some(Rejection::ForwardedExcluded)
        );
    }

    #[test]
    fn rate_gate_uses_min_interval() {
        let dir = tempfile::tempdir().unwrap();
        // 10 per minute -> 6s between accepts.
        let store = MessageStore::new(&test_config(dir.path()));

        let t0 = Utc::now();
        assert_eq!(store.admit(&event("m1", "g1", "first message"), t0), None);
        assert_eq!(
            store.admit(
                &event("m2", "g1", "too soon"),
                t0 + ChronoDuration::seconds(1)
            ),
            Some(Rejection::RateLimited)
        );
        assert_eq!(
            store.admit(
                &event("m3", "g1", "late enough"),
                t0 + ChronoDuration::seconds(6)
            ),
            None
        );
    }

    #[test]
    fn rate_gate_is_per_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::new(&test_config(dir.path()));

        let t0 = Utc::now();
        assert_eq!(store.admit(&event("m1", "g1", "first in g1"), t0), None);
        assert_eq!(store.admit(&event("m2", "g2", "first in g2"), t0), None);
    }

    #[tokio::test]
    async fn append_evicts_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.max_messages_per_source = 2;
        cfg.throttle.max_messages_per_minute = 100_000; // interval rounds to zero, no gate
        let store = MessageStore::new(&cfg);

        for (id, text) in [("a", "message a"), ("b", "message b"), ("c", "message c")] {
            let outcome = store.add_message(&event(id, "g1", text), "Group One").await;
            assert!(outcome.is_accepted());
        }

        let msgs = store.source_messages("g1");
        let ids: Vec<&str> = msgs.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.throttle.max_messages_per_minute = 100_000;
        let store = MessageStore::new(&cfg);

        assert!(store
            .add_message(&event("m1", "g1", "original text"), "G")
            .await
            .is_accepted());
        assert_eq!(
            store.add_message(&event("m1", "g1", "redelivered"), "G").await,
            AddOutcome::Rejected(Rejection::Duplicate)
        );
        assert_eq!(store.source_messages("g1").len(), 1);
    }

    #[tokio::test]
    async fn processed_flag_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.throttle.max_messages_per_minute = 100_000;
        let store = MessageStore::new(&cfg);

        store
            .add_message(&event("m1", "g1", "first message"), "G")
            .await;
        store
            .add_message(&event("m2", "g1", "second message"), "G")
            .await;
        assert!(store.has_unprocessed());

        assert_eq!(store.mark_processed(&["m1".into()]), 1);
        assert_eq!(store.mark_processed(&["m1".into()]), 0); // no-op re-mark
        assert_eq!(store.unprocessed().len(), 1);

        assert_eq!(store.mark_processed(&["m2".into()]), 1);
        assert!(!store.has_unprocessed());
    }

    #[tokio::test]
    async fn snapshot_restores_messages_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.throttle.max_messages_per_minute = 100_000;

        {
            let store = MessageStore::new(&cfg);
            store
                .add_message(&event("m1", "g1", "persisted message"), "G")
                .await;
            store.mark_processed(&["m1".into()]);
        }

        let restored = MessageStore::new(&cfg);
        let msgs = restored.source_messages("g1");
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].meta.processed);
        assert!(!restored.has_unprocessed());
    }

    #[tokio::test]
    async fn clear_drops_only_the_named_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.throttle.max_messages_per_minute = 100_000;
        let store = MessageStore::new(&cfg);

        store.add_message(&event("m1", "g1", "in group one"), "G1").await;
        store.add_message(&event("m2", "g2", "in group two"), "G2").await;

        assert_eq!(store.clear("g1"), 1);
        assert_eq!(store.stats().total_messages, 1);
        assert_eq!(store.clear_all(), 1);
        assert_eq!(store.stats().total_messages, 0);
    }
}
