// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod cache;
pub mod config;
pub mod model;
pub mod notify;
pub mod persist;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod transport;

// Curation pipeline (ranking seam, relevance ledger, cycle orchestration)
pub mod curate;

// ---- Re-exports for stable public API ----
pub use crate::config::{CuratorConfig, InterestProfile};
pub use crate::curate::ranker::{self, MockRanker, RankingClient};
pub use crate::curate::{CurationEngine, CycleOutcome};
pub use crate::model::{CuratedRecord, InboundEvent, StoredMessage};
pub use crate::pipeline::Pipeline;
pub use crate::store::{AddOutcome, MessageStore, Rejection};
pub use crate::transport::{MockTransport, Transport, WebhookTransport};
