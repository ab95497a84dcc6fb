// src/model.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw record handed over by the transport layer. Ephemeral: consumed by the
/// dispatch queue, canonicalized by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundEvent {
    /// Transport message id, unique per source.
    pub id: String,
    pub source_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    #[serde(default)]
    pub has_media: bool,
    #[serde(default)]
    pub is_forwarded: bool,
    #[serde(default)]
    pub quoted_ref: Option<String>,
    /// Unix seconds as reported by the transport.
    pub timestamp: u64,
    /// True when the event originated from our own account.
    #[serde(default)]
    pub from_self: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sender {
    pub id: String,
    pub name: String,
    pub is_self: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Media,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Content {
    pub text: String,
    pub kind: ContentKind,
    pub has_media: bool,
    pub is_forwarded: bool,
    #[serde(default)]
    pub quoted_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageMeta {
    pub source_id: String,
    pub source_name: String,
    pub processed: bool,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    pub scraped_at: DateTime<Utc>,
}

/// Canonical persisted form of one accepted message. Owned exclusively by the
/// store; mutated only to flip `meta.processed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: String,
    pub timestamp: u64,
    pub sender: Sender,
    pub content: Content,
    pub meta: MessageMeta,
}

impl StoredMessage {
    /// Canonicalize an inbound event under the given source display name.
    pub fn from_event(event: &InboundEvent, source_name: &str, now: DateTime<Utc>) -> Self {
        let kind = if event.has_media {
            ContentKind::Media
        } else {
            ContentKind::Text
        };
        Self {
            id: event.id.clone(),
            timestamp: event.timestamp,
            sender: Sender {
                id: event.sender_id.clone(),
                name: event.sender_name.clone(),
                is_self: event.from_self,
            },
            content: Content {
                text: event.text.clone(),
                kind,
                has_media: event.has_media,
                is_forwarded: event.is_forwarded,
                quoted_ref: event.quoted_ref.clone(),
            },
            meta: MessageMeta {
                source_id: event.source_id.clone(),
                source_name: source_name.to_string(),
                processed: false,
                processed_at: None,
                scraped_at: now,
            },
        }
    }
}

/// Relevance annotation attached by a completed curation cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Curation {
    /// Relevance against the interest profile, in [0, 1].
    pub relevance: f32,
    pub category: String,
    pub reason: String,
    pub curated_at: DateTime<Utc>,
}

/// A stored message that survived curation. Lives in the cross-source
/// relevance ledger; append-only except for the `notified` flip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CuratedRecord {
    #[serde(flatten)]
    pub message: StoredMessage,
    pub curation: Curation,
    pub notified: bool,
    #[serde(default)]
    pub notified_at: Option<DateTime<Utc>>,
}
