// tests/delivery_outcomes.rs
//
// Delivery is best-effort per record: a failed send is reported, not
// retried, and only successfully delivered records flip `notified`.

use std::sync::Arc;

use chat_curator::config::{CuratorConfig, InterestProfile};
use chat_curator::curate::ranker::MockRanker;
use chat_curator::curate::{CurationEngine, CycleOutcome};
use chat_curator::model::InboundEvent;
use chat_curator::notify::NotificationDispatcher;
use chat_curator::store::MessageStore;
use chat_curator::transport::MockTransport;

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
        timestamp: 1_700_000_000,
        from_self: false,
    }
}

#[tokio::test]
async fn failed_send_leaves_notified_false() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = CuratorConfig::default();
    cfg.store_path = dir.path().join("messages.json");
    cfg.ledger_path = dir.path().join("relevant.json");
    cfg.throttle.max_messages_per_minute = 100_000;
    cfg.notify_pacing_ms = 0;
    cfg.top_k = 2;

    let store = Arc::new(MessageStore::new(&cfg));
    let transport = Arc::new(MockTransport::new());
    // First send succeeds, second fails.
    transport.plan_sends(&[true, false]);
    let dispatcher = NotificationDispatcher::new(transport.clone(), "ops".into(), 0);
    let engine = CurationEngine::new(
        &cfg,
        store.clone(),
        Arc::new(MockRanker::new()),
        dispatcher,
        InterestProfile::default(),
    );

    store.add_message(&event("m1", "first curated"), "G").await;
    store.add_message(&event("m2", "second curated"), "G").await;

    let outcome = engine.run_cycle().await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Completed {
            evaluated: 2,
            selected: 2,
            delivered: 1
        }
    );

    let records = engine.ledger().records();
    assert_eq!(records.len(), 2);
    let notified: Vec<bool> = records.iter().map(|r| r.notified).collect();
    assert_eq!(notified.iter().filter(|n| **n).count(), 1);

    // The failed record stays in the ledger, undelivered, with no timestamp.
    let failed = records.iter().find(|r| !r.notified).unwrap();
    assert!(failed.notified_at.is_none());

    // Both candidates are still marked processed; delivery failures never
    // push a message back into the backlog.
    assert!(!store.has_unprocessed());
}
