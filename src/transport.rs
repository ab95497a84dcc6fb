// src/transport.rs
//! Boundary to the chat session layer. The pipeline never manages the
//! connection itself; it only needs an outbound `send` and a metadata
//! lookup, so both live behind one trait.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceMeta {
    pub display_name: String,
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `body` to `destination` (a chat/channel id).
    async fn send(&self, destination: &str, body: &str) -> Result<()>;
    /// Look up display metadata for a source id.
    async fn fetch_metadata(&self, source_id: &str) -> Result<SourceMeta>;
}

/// HTTP bridge to a session host: outbound messages POSTed to a webhook,
/// metadata fetched from a sibling endpoint.
pub struct WebhookTransport {
    send_url: String,
    meta_url: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

#[derive(Serialize)]
struct OutboundPayload<'a> {
    destination: &'a str,
    body: &'a str,
}

impl WebhookTransport {
    pub fn new(send_url: String, meta_url: String) -> Self {
        Self {
            send_url,
            meta_url,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn from_env() -> Result<Self> {
        let send_url =
            std::env::var("CURATOR_SEND_URL").context("CURATOR_SEND_URL is not set")?;
        let meta_url =
            std::env::var("CURATOR_META_URL").context("CURATOR_META_URL is not set")?;
        Ok(Self::new(send_url, meta_url))
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }
}

#[async_trait::async_trait]
impl Transport for WebhookTransport {
    async fn send(&self, destination: &str, body: &str) -> Result<()> {
        let payload = OutboundPayload { destination, body };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.send_url)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("outbound webhook HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("outbound webhook request failed: {e}"));
                }
            }
        }
    }

    async fn fetch_metadata(&self, source_id: &str) -> Result<SourceMeta> {
        let url = format!("{}/{}", self.meta_url.trim_end_matches('/'), source_id);
        let rsp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .context("metadata request")?
            .error_for_status()
            .context("metadata non-2xx")?;
        rsp.json::<SourceMeta>().await.context("metadata body")
    }
}

// --- Test double ---

/// In-memory transport for tests and local runs: records every send, serves
/// metadata from a map, and can be scripted to fail specific sends.
#[derive(Default)]
pub struct MockTransport {
    sent: std::sync::Mutex<Vec<(String, String)>>,
    send_plan: std::sync::Mutex<std::collections::VecDeque<bool>>,
    meta: std::sync::Mutex<std::collections::HashMap<String, String>>,
    meta_calls: std::sync::atomic::AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_metadata(&self, source_id: &str, display_name: &str) {
        self.meta
            .lock()
            .unwrap()
            .insert(source_id.to_string(), display_name.to_string());
    }

    /// Script outcomes for upcoming sends, in order; unscripted sends succeed.
    pub fn plan_sends(&self, outcomes: &[bool]) {
        self.send_plan.lock().unwrap().extend(outcomes.iter().copied());
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn metadata_calls(&self) -> usize {
        self.meta_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(&self, destination: &str, body: &str) -> Result<()> {
        let ok = self.send_plan.lock().unwrap().pop_front().unwrap_or(true);
        if !ok {
            return Err(anyhow!("scripted send failure"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), body.to_string()));
        Ok(())
    }

    async fn fetch_metadata(&self, source_id: &str) -> Result<SourceMeta> {
        self.meta_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.meta
            .lock()
            .unwrap()
            .get(source_id)
            .map(|name| SourceMeta {
                display_name: name.clone(),
            })
            .ok_or_else(|| anyhow!("unknown source {source_id}"))
    }
}
