// src/notify.rs
//! Delivery of newly curated records: one message at a time, paced so the
//! destination side is never flooded. Failures are reported per record, not
//! retried here.

use std::sync::Arc;
use std::time::Duration;

use crate::model::CuratedRecord;
use crate::transport::Transport;

const EXCERPT_LEN: usize = 120;

#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub id: String,
    pub delivered: bool,
    pub error: Option<String>,
}

pub struct NotificationDispatcher {
    transport: Arc<dyn Transport>,
    destination: String,
    pacing: Duration,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn Transport>, destination: String, pacing_ms: u64) -> Self {
        Self {
            transport,
            destination,
            pacing: Duration::from_millis(pacing_ms),
        }
    }

    /// Send each record sequentially with the pacing pause between sends.
    /// The caller flips `notified` on successes only.
    pub async fn deliver(&self, records: &[CuratedRecord]) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pacing).await;
            }
            let body = format_summary(record);
            let outcome = match self.transport.send(&self.destination, &body).await {
                Ok(()) => DeliveryOutcome {
                    id: record.message.id.clone(),
                    delivered: true,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(id = %record.message.id, error = ?e, "notification failed");
                    DeliveryOutcome {
                        id: record.message.id.clone(),
                        delivered: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Human-readable summary: excerpt, relevance, category, justification, and
/// the full text underneath.
pub fn format_summary(record: &CuratedRecord) -> String {
    let text = &record.message.content.text;
    format!(
        "[{}] {} in {}\n\"{}\"\nRelevance: {:.2}\nWhy: {}\n\n{}",
        record.curation.category,
        record.message.sender.name,
        record.message.meta.source_name,
        excerpt(text),
        record.curation.relevance,
        record.curation.reason,
        text
    )
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_LEN {
        return text.to_string();
    }
    let cut: String = text.chars().take(EXCERPT_LEN).collect();
    format!("{}…", cut.trim_end())
}
