// src/curate/mod.rs
//! Curation orchestrator: one cycle walks the unprocessed backlog through
//! batch → rank → merge → deliver, then flags the whole batch processed so
//! nothing is ranked twice.

pub mod ledger;
pub mod ranker;

use anyhow::{Context, Result};
use chrono::Utc;
use metrics::counter;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::{CuratorConfig, InterestProfile};
use crate::model::{Curation, CuratedRecord};
use crate::notify::NotificationDispatcher;
use crate::store::MessageStore;
use ledger::RelevanceLedger;
use ranker::{DynRankingClient, RankCandidate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Backlog was empty; no ranking call, no side effects.
    Skipped,
    Completed {
        evaluated: usize,
        selected: usize,
        delivered: usize,
    },
}

pub struct CurationEngine {
    store: Arc<MessageStore>,
    ranking: DynRankingClient,
    dispatcher: NotificationDispatcher,
    ledger: RelevanceLedger,
    profile: RwLock<InterestProfile>,
    top_k: usize,
    /// Serializes overlapping triggers; the processed flag alone is not
    /// enough on a preemptive runtime (two cycles could batch the same
    /// backlog before either marks it).
    cycle_gate: tokio::sync::Mutex<()>,
}

impl CurationEngine {
    pub fn new(
        cfg: &CuratorConfig,
        store: Arc<MessageStore>,
        ranking: DynRankingClient,
        dispatcher: NotificationDispatcher,
        profile: InterestProfile,
    ) -> Self {
        Self {
            store,
            ranking,
            dispatcher,
            ledger: RelevanceLedger::new(cfg.ledger_path.clone()),
            profile: RwLock::new(profile),
            top_k: cfg.top_k,
            cycle_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn ledger(&self) -> &RelevanceLedger {
        &self.ledger
    }

    /// Swap the interest profile (admin reload).
    pub fn reload_profile(&self, profile: InterestProfile) {
        *self.profile.write().expect("profile rwlock poisoned") = profile;
    }

    /// Run one curation cycle. Both trigger paths (post-write and manual)
    /// land here; a ranking failure aborts with the backlog intact.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let _cycle = self.cycle_gate.lock().await;

        if !self.store.has_unprocessed() {
            return Ok(CycleOutcome::Skipped);
        }

        let batch = self.store.unprocessed();
        let candidates: Vec<RankCandidate> =
            batch.iter().map(RankCandidate::from_message).collect();
        let profile = self
            .profile
            .read()
            .expect("profile rwlock poisoned")
            .clone();

        let mut ranked = self
            .ranking
            .rank(&candidates, &profile, self.top_k)
            .await
            .context("ranking call failed, backlog preserved")?;
        ranker::validate_ranking(&candidates, &mut ranked, self.top_k)
            .context("ranking contract violation, backlog preserved")?;
        counter!("curation_cycles_total").increment(1);

        let now = Utc::now();
        let by_id: HashMap<&str, _> = batch.iter().map(|m| (m.id.as_str(), m)).collect();
        let selected: Vec<CuratedRecord> = ranked
            .iter()
            .filter(|item| item.include)
            .filter_map(|item| {
                by_id.get(item.id.as_str()).map(|msg| CuratedRecord {
                    message: (*msg).clone(),
                    curation: Curation {
                        relevance: item.relevance,
                        category: item.category.clone(),
                        reason: item.reason.clone(),
                        curated_at: now,
                    },
                    notified: false,
                    notified_at: None,
                })
            })
            .collect();

        let appended = self.ledger.merge(selected, candidates.len());

        // The whole batch is ranked now, selected or not; flag it before the
        // slow delivery phase so no later trigger re-batches these ids.
        let batch_ids: Vec<String> = batch.iter().map(|m| m.id.clone()).collect();
        self.store.mark_processed(&batch_ids);

        let mut delivered = 0usize;
        if !appended.is_empty() {
            let outcomes = self.dispatcher.deliver(&appended).await;
            let ok_ids: Vec<String> = outcomes
                .iter()
                .filter(|o| o.delivered)
                .map(|o| o.id.clone())
                .collect();
            delivered = ok_ids.len();
            self.ledger.mark_notified(&ok_ids, Utc::now());
        }

        counter!("curation_selected_total").increment(appended.len() as u64);
        counter!("curation_delivered_total").increment(delivered as u64);
        tracing::info!(
            evaluated = candidates.len(),
            selected = appended.len(),
            delivered,
            "curation cycle complete"
        );

        Ok(CycleOutcome::Completed {
            evaluated: candidates.len(),
            selected: appended.len(),
            delivered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InboundEvent;
    use crate::store::MessageStore;
    use crate::transport::MockTransport;
    use ranker::MockRanker;

    fn test_config(dir: &std::path::Path) -> CuratorConfig {
        let mut cfg = CuratorConfig::default();
        cfg.store_path = dir.join("messages.json");
        cfg.ledger_path = dir.join("relevant.json");
        cfg.throttle.max_messages_per_minute = 100_000;
        cfg.notify_pacing_ms = 0;
        cfg.top_k = 2;
        cfg
    }

    fn event(id: &str, text: &str) -> InboundEvent {
        InboundEvent {
            id: id.into(),
            source_id: "g1".into(),
            sender_id: "u1".into(),
            sender_name: "Ada".into(),
            text: text.into(),
            has_media: false,
            is_forwarded: false,
            quoted_ref: None,
            timestamp: 0,
            from_self: false,
        }
    }

    fn engine(
        dir: &std::path::Path,
        ranker: Arc<MockRanker>,
        transport: Arc<MockTransport>,
    ) -> (CurationEngine, Arc<MessageStore>) {
        let cfg = test_config(dir);
        let store = Arc::new(MessageStore::new(&cfg));
        let dispatcher = NotificationDispatcher::new(transport, "ops".into(), 0);
        let engine = CurationEngine::new(
            &cfg,
            store.clone(),
            ranker,
            dispatcher,
            InterestProfile::default(),
        );
        (engine, store)
    }

    #[tokio::test]
    async fn empty_backlog_skips_without_ranking() {
        let dir = tempfile::tempdir().unwrap();
        let ranker = Arc::new(MockRanker::new());
        let transport = Arc::new(MockTransport::new());
        let (engine, _store) = engine(dir.path(), ranker.clone(), transport);

        assert_eq!(engine.run_cycle().await.unwrap(), CycleOutcome::Skipped);
        assert_eq!(ranker.calls(), 0);
        assert!(engine.ledger().is_empty());
    }

    #[tokio::test]
    async fn ranking_failure_preserves_the_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let ranker = Arc::new(MockRanker::new());
        ranker.push_response(Err("upstream 500".into()));
        let transport = Arc::new(MockTransport::new());
        let (engine, store) = engine(dir.path(), ranker.clone(), transport);

        store.add_message(&event("m1", "some message"), "G").await;
        assert!(engine.run_cycle().await.is_err());

        // Nothing marked, nothing merged; the next cycle retries.
        assert!(store.has_unprocessed());
        assert!(engine.ledger().is_empty());

        assert!(matches!(
            engine.run_cycle().await.unwrap(),
            CycleOutcome::Completed { evaluated: 1, .. }
        ));
        assert!(!store.has_unprocessed());
    }

    #[tokio::test]
    async fn cycle_marks_all_candidates_processed() {
        let dir = tempfile::tempdir().unwrap();
        let ranker = Arc::new(MockRanker::new());
        let transport = Arc::new(MockTransport::new());
        let (engine, store) = engine(dir.path(), ranker, transport);

        for i in 0..5 {
            store
                .add_message(&event(&format!("m{i}"), "candidate message"), "G")
                .await;
        }

        let outcome = engine.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                evaluated: 5,
                selected: 2,
                delivered: 2
            }
        );
        assert_eq!(engine.ledger().len(), 2);
        assert!(!store.has_unprocessed());
    }
}
