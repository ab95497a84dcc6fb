// src/curate/ledger.rs
//! Cross-source relevance ledger: every message that ever survived curation,
//! deduplicated by id and kept sorted by descending relevance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::model::CuratedRecord;
use crate::persist;

/// Durable ledger record; overwritten wholesale on every persist.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerSnapshot {
    last_updated: DateTime<Utc>,
    /// Cumulative candidates ever evaluated by completed cycles.
    total_evaluated: u64,
    /// Cumulative records ever appended.
    total_relevant: u64,
    total_messages: usize,
    messages: Vec<CuratedRecord>,
}

#[derive(Debug, Default)]
struct LedgerState {
    records: Vec<CuratedRecord>,
    total_evaluated: u64,
    total_relevant: u64,
}

pub struct RelevanceLedger {
    path: PathBuf,
    inner: Mutex<LedgerState>,
}

impl RelevanceLedger {
    /// Open the ledger, restoring the last snapshot if one exists.
    pub fn new(path: PathBuf) -> Self {
        let state = match persist::read_json::<LedgerSnapshot>(&path) {
            Some(snap) => {
                tracing::info!(
                    records = snap.messages.len(),
                    path = %path.display(),
                    "restored relevance ledger"
                );
                LedgerState {
                    records: snap.messages,
                    total_evaluated: snap.total_evaluated,
                    total_relevant: snap.total_relevant,
                }
            }
            None => LedgerState::default(),
        };
        Self {
            path,
            inner: Mutex::new(state),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        let guard = self.inner.lock().expect("ledger mutex poisoned");
        guard.records.iter().any(|r| r.message.id == id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("ledger mutex poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge newly curated records: drop ids already present (a message
    /// curated once is never re-added), append the rest, re-sort descending
    /// by relevance, persist. Returns the records actually appended.
    pub fn merge(&self, incoming: Vec<CuratedRecord>, evaluated: usize) -> Vec<CuratedRecord> {
        let appended = {
            let mut guard = self.inner.lock().expect("ledger mutex poisoned");
            let mut known: HashSet<String> = guard
                .records
                .iter()
                .map(|r| r.message.id.clone())
                .collect();
            let mut appended = Vec::new();
            for record in incoming {
                if known.insert(record.message.id.clone()) {
                    appended.push(record.clone());
                    guard.records.push(record);
                }
            }
            guard
                .records
                .sort_by(|a, b| b.curation.relevance.total_cmp(&a.curation.relevance));
            guard.total_evaluated += evaluated as u64;
            guard.total_relevant += appended.len() as u64;
            appended
        };
        if let Err(e) = self.save() {
            tracing::error!(error = ?e, "ledger persist failed");
        }
        appended
    }

    /// Flip `notified` on the given ids. Called only for records whose
    /// delivery succeeded.
    pub fn mark_notified(&self, ids: &[String], now: DateTime<Utc>) -> usize {
        let flipped = {
            let mut guard = self.inner.lock().expect("ledger mutex poisoned");
            let mut flipped = 0usize;
            for record in guard.records.iter_mut() {
                if !record.notified && ids.iter().any(|id| *id == record.message.id) {
                    record.notified = true;
                    record.notified_at = Some(now);
                    flipped += 1;
                }
            }
            flipped
        };
        if flipped > 0 {
            if let Err(e) = self.save() {
                tracing::error!(error = ?e, "ledger persist failed after mark_notified");
            }
        }
        flipped
    }

    pub fn records(&self) -> Vec<CuratedRecord> {
        self.inner
            .lock()
            .expect("ledger mutex poisoned")
            .records
            .clone()
    }

    pub fn save(&self) -> std::io::Result<()> {
        let snapshot = {
            let guard = self.inner.lock().expect("ledger mutex poisoned");
            LedgerSnapshot {
                last_updated: Utc::now(),
                total_evaluated: guard.total_evaluated,
                total_relevant: guard.total_relevant,
                total_messages: guard.records.len(),
                messages: guard.records.clone(),
            }
        };
        persist::write_json_atomic(&self.path, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Curation, InboundEvent, StoredMessage};

    fn record(id: &str, relevance: f32) -> CuratedRecord {
        let event = InboundEvent {
            id: id.into(),
            source_id: "g1".into(),
            sender_id: "u1".into(),
            sender_name: "Ada".into(),
            text: format!("message {id}"),
            has_media: false,
            is_forwarded: false,
            quoted_ref: None,
            timestamp: 0,
            from_self: false,
        };
        CuratedRecord {
            message: StoredMessage::from_event(&event, "G", Utc::now()),
            curation: Curation {
                relevance,
                category: "general".into(),
                reason: "test".into(),
                curated_at: Utc::now(),
            },
            notified: false,
            notified_at: None,
        }
    }

    #[test]
    fn merge_dedups_and_sorts_descending() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RelevanceLedger::new(dir.path().join("relevant.json"));

        let first = ledger.merge(vec![record("a", 0.5), record("b", 0.9)], 2);
        assert_eq!(first.len(), 2);

        // "a" again (higher score) plus a genuinely new record.
        let second = ledger.merge(vec![record("a", 0.99), record("c", 0.7)], 2);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message.id, "c");

        let order: Vec<String> = ledger
            .records()
            .iter()
            .map(|r| r.message.id.clone())
            .collect();
        assert_eq!(order, vec!["b", "c", "a"]);

        let rel: Vec<f32> = ledger
            .records()
            .iter()
            .map(|r| r.curation.relevance)
            .collect();
        assert!(rel.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn mark_notified_flips_only_named_ids() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RelevanceLedger::new(dir.path().join("relevant.json"));
        ledger.merge(vec![record("a", 0.9), record("b", 0.8)], 2);

        assert_eq!(ledger.mark_notified(&["a".into()], Utc::now()), 1);
        let records = ledger.records();
        let a = records.iter().find(|r| r.message.id == "a").unwrap();
        let b = records.iter().find(|r| r.message.id == "b").unwrap();
        assert!(a.notified && a.notified_at.is_some());
        assert!(!b.notified && b.notified_at.is_none());
    }

    #[test]
    fn snapshot_restores_records_and_totals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relevant.json");
        {
            let ledger = RelevanceLedger::new(path.clone());
            ledger.merge(vec![record("a", 0.9)], 3);
        }
        let restored = RelevanceLedger::new(path);
        assert_eq!(restored.len(), 1);
        assert!(restored.contains("a"));
    }
}
