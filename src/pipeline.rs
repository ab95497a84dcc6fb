// src/pipeline.rs
//! Explicitly constructed pipeline context: owns the store, cache, queue and
//! curation engine, and wires the background tasks. No ambient globals; the
//! admin surface and the binary both hold this context by `Arc`.

use metrics::{describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cache::MetaCache;
use crate::config::{CuratorConfig, InterestProfile};
use crate::curate::ranker::DynRankingClient;
use crate::curate::CurationEngine;
use crate::notify::NotificationDispatcher;
use crate::queue::DispatchQueue;
use crate::store::MessageStore;
use crate::transport::Transport;

/// One-time metrics registration (so series show up on whatever recorder the
/// host installs).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("queue_enqueued_total", "Events admitted to the dispatch queue.");
        describe_counter!(
            "queue_skipped_self_total",
            "Self-originated events dropped at admission."
        );
        describe_counter!("queue_processed_total", "Events accepted by the store.");
        describe_counter!("store_accepted_total", "Messages appended to a source ledger.");
        describe_counter!(
            "store_rejected_total",
            "Events rejected by filters or the rate gate."
        );
        describe_counter!("curation_cycles_total", "Completed curation cycles.");
        describe_counter!(
            "curation_selected_total",
            "Records appended to the relevance ledger."
        );
        describe_counter!("curation_delivered_total", "Curated records delivered.");
        describe_gauge!("store_autosave_last_ts", "Unix ts of the last autosave.");
    });
}

pub struct Pipeline {
    pub config: CuratorConfig,
    pub store: Arc<MessageStore>,
    pub cache: Arc<MetaCache>,
    pub queue: DispatchQueue,
    pub curator: Arc<CurationEngine>,
}

impl Pipeline {
    /// Wire the components. Background tasks are spawned separately via
    /// [`Pipeline::start`], so tests can drive the pipeline synchronously.
    pub fn new(
        config: CuratorConfig,
        transport: Arc<dyn Transport>,
        ranking: DynRankingClient,
        profile: InterestProfile,
    ) -> Arc<Self> {
        ensure_metrics_described();

        let store = Arc::new(MessageStore::new(&config));
        let cache = Arc::new(MetaCache::new(transport.clone(), config.cache_ttl_secs));
        let queue = DispatchQueue::new(config.queue_concurrency, cache.clone(), store.clone());
        let dispatcher = NotificationDispatcher::new(
            transport,
            config.notify_destination.clone(),
            config.notify_pacing_ms,
        );
        let curator = Arc::new(CurationEngine::new(
            &config,
            store.clone(),
            ranking,
            dispatcher,
            profile,
        ));

        Arc::new(Self {
            config,
            store,
            cache,
            queue,
            curator,
        })
    }

    /// Spawn the curation-trigger listener and the periodic autosave task.
    pub fn start(self: &Arc<Self>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        self.store.set_curation_trigger(tx);

        let curator = self.curator.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Coalesce triggers that piled up while a cycle was running;
                // the next cycle sees the whole backlog anyway.
                while rx.try_recv().is_ok() {}
                if let Err(e) = curator.run_cycle().await {
                    tracing::warn!(error = ?e, "triggered curation cycle failed");
                }
            }
        });

        if self.config.autosave_secs > 0 {
            let store = self.store.clone();
            let period = std::time::Duration::from_secs(self.config.autosave_secs);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await; // immediate first tick
                loop {
                    ticker.tick().await;
                    match store.save() {
                        Ok(()) => {
                            gauge!("store_autosave_last_ts")
                                .set(chrono::Utc::now().timestamp() as f64);
                        }
                        Err(e) => tracing::error!(error = ?e, "autosave failed"),
                    }
                }
            });
        }
    }
}
