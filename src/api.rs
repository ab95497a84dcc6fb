// src/api.rs
//! Operational HTTP surface. Every route maps 1:1 onto a store or
//! orchestrator method; the pipeline itself never depends on this layer.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::config::InterestProfile;
use crate::curate::CycleOutcome;
use crate::model::{CuratedRecord, InboundEvent, StoredMessage};
use crate::pipeline::Pipeline;
use crate::store::StoreStats;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/ingest", post(ingest))
        .route("/stats", get(stats))
        .route("/export", get(export))
        .route("/ledger", get(ledger))
        .route("/save", post(save))
        .route("/curate", post(curate))
        .route("/clear/{source}", post(clear_source))
        .route("/clear", post(clear_all))
        .route("/admin/reload-profile", post(reload_profile))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(serde::Serialize)]
struct IngestResp {
    received: usize,
}

async fn ingest(
    State(state): State<AppState>,
    Json(events): Json<Vec<InboundEvent>>,
) -> Json<IngestResp> {
    let received = events.len();
    state.pipeline.queue.enqueue(events);
    Json(IngestResp { received })
}

async fn stats(State(state): State<AppState>) -> Json<StoreStats> {
    Json(state.pipeline.store.stats())
}

async fn export(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, Vec<StoredMessage>>> {
    Json(state.pipeline.store.all_messages())
}

async fn ledger(State(state): State<AppState>) -> Json<Vec<CuratedRecord>> {
    Json(state.pipeline.curator.ledger().records())
}

async fn save(State(state): State<AppState>) -> String {
    match state.pipeline.store.save() {
        Ok(()) => "saved".to_string(),
        Err(e) => format!("save failed: {e}"),
    }
}

#[derive(serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum CurateResp {
    Skipped,
    Completed {
        evaluated: usize,
        selected: usize,
        delivered: usize,
    },
    Failed {
        error: String,
    },
}

async fn curate(State(state): State<AppState>) -> Json<CurateResp> {
    match state.pipeline.curator.run_cycle().await {
        Ok(CycleOutcome::Skipped) => Json(CurateResp::Skipped),
        Ok(CycleOutcome::Completed {
            evaluated,
            selected,
            delivered,
        }) => Json(CurateResp::Completed {
            evaluated,
            selected,
            delivered,
        }),
        Err(e) => Json(CurateResp::Failed {
            error: e.to_string(),
        }),
    }
}

#[derive(serde::Serialize)]
struct ClearResp {
    removed: usize,
}

async fn clear_source(
    State(state): State<AppState>,
    Path(source): Path<String>,
) -> Json<ClearResp> {
    Json(ClearResp {
        removed: state.pipeline.store.clear(&source),
    })
}

async fn clear_all(State(state): State<AppState>) -> Json<ClearResp> {
    Json(ClearResp {
        removed: state.pipeline.store.clear_all(),
    })
}

async fn reload_profile(State(state): State<AppState>) -> String {
    let fresh = InterestProfile::load_default();
    state.pipeline.curator.reload_profile(fresh);
    "reloaded".to_string()
}
