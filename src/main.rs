//! Chat Curator — Binary Entrypoint
//! Boots the pipeline and the Axum operational surface.

use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chat_curator::api::{self, AppState};
use chat_curator::config::{CuratorConfig, InterestProfile};
use chat_curator::pipeline::Pipeline;
use chat_curator::ranker;
use chat_curator::transport::{Transport, WebhookTransport};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chat_curator=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = CuratorConfig::load_default()?;
    let profile = InterestProfile::load_default();

    let transport: Arc<dyn Transport> = Arc::new(WebhookTransport::from_env()?);
    let ranking = ranker::build_ranker(&config.ranker);
    tracing::info!(provider = ranking.provider_name(), "ranking client ready");

    let bind_addr = config.bind_addr.clone();
    let pipeline = Pipeline::new(config, transport, ranking, profile);
    pipeline.start();

    let router = api::create_router(AppState { pipeline });
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "operational surface listening");
    axum::serve(listener, router).await?;
    Ok(())
}
