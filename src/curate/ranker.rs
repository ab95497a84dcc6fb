// src/curate/ranker.rs
//! Ranking capability boundary: provider abstraction + contract validation.
//! The pipeline treats ranking as an opaque oracle; everything here is about
//! calling it safely and refusing malformed answers.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{InterestProfile, RankerConfig};
use crate::model::StoredMessage;

/// One unprocessed message, flattened for the ranking call.
#[derive(Debug, Clone, Serialize)]
pub struct RankCandidate {
    pub id: String,
    pub source_id: String,
    pub source_name: String,
    pub sender_name: String,
    pub text: String,
    pub timestamp: u64,
}

impl RankCandidate {
    pub fn from_message(msg: &StoredMessage) -> Self {
        Self {
            id: msg.id.clone(),
            source_id: msg.meta.source_id.clone(),
            source_name: msg.meta.source_name.clone(),
            sender_name: msg.sender.name.clone(),
            text: msg.content.text.clone(),
            timestamp: msg.timestamp,
        }
    }
}

/// Per-candidate verdict. The contract requires every input id to appear
/// exactly once, with `include=true` on exactly the top K.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedItem {
    pub id: String,
    pub include: bool,
    pub relevance: f32,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub reason: String,
}

#[async_trait::async_trait]
pub trait RankingClient: Send + Sync {
    async fn rank(
        &self,
        candidates: &[RankCandidate],
        profile: &InterestProfile,
        top_k: usize,
    ) -> Result<Vec<RankedItem>>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynRankingClient = Arc<dyn RankingClient>;

/// Factory: build a client according to config and environment.
///
/// * If `RANKER_TEST_MODE=mock`, returns a deterministic mock client.
/// * Else if `config.enabled==false`, returns a disabled client.
/// * Else builds the hosted provider.
pub fn build_ranker(config: &RankerConfig) -> DynRankingClient {
    if std::env::var("RANKER_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(MockRanker::new());
    }
    if !config.enabled {
        return Arc::new(DisabledRanker);
    }
    match config.provider.as_str() {
        "hosted" => Arc::new(HostedRanker::new(config)),
        other => {
            tracing::warn!(provider = other, "unknown ranking provider, disabling");
            Arc::new(DisabledRanker)
        }
    }
}

/// Enforce the ranking contract against the candidate batch. Mutates only to
/// clamp relevance into [0, 1]; any structural violation is an error and the
/// caller aborts the cycle.
pub fn validate_ranking(
    candidates: &[RankCandidate],
    items: &mut [RankedItem],
    top_k: usize,
) -> Result<()> {
    if items.len() != candidates.len() {
        bail!(
            "ranking returned {} items for {} candidates",
            items.len(),
            candidates.len()
        );
    }
    let expected: HashSet<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    for item in items.iter() {
        if !expected.contains(item.id.as_str()) {
            bail!("ranking returned unknown id {}", item.id);
        }
        if !seen.insert(item.id.as_str()) {
            bail!("ranking returned id {} twice", item.id);
        }
    }
    if seen.len() != expected.len() {
        bail!("ranking response omitted {} id(s)", expected.len() - seen.len());
    }
    let included = items.iter().filter(|i| i.include).count();
    let want = top_k.min(candidates.len());
    if included != want {
        bail!("ranking included {included} items, contract requires {want}");
    }
    for item in items.iter_mut() {
        item.relevance = item.relevance.clamp(0.0, 1.0);
    }
    Ok(())
}

// ------------------------------------------------------------
// Hosted provider (chat-completions style JSON endpoint)
// ------------------------------------------------------------

pub struct HostedRanker {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl HostedRanker {
    pub fn new(config: &RankerConfig) -> Self {
        let api_key = std::env::var("RANKER_API_KEY").unwrap_or_default();
        let http = reqwest::Client::builder()
            .user_agent("chat-curator/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_url: config.api_url.clone(),
            api_key,
            model: config.model.clone(),
        }
    }

    fn prompt(candidates: &[RankCandidate], profile: &InterestProfile, top_k: usize) -> String {
        let batch = serde_json::to_string(candidates).unwrap_or_else(|_| "[]".to_string());
        format!(
            "Interest profile: {}\n\nCandidates (JSON): {}\n\nScore every candidate's \
             relevance to the profile in [0,1]. Select the top {} as include=true and \
             all others include=false. Reply with ONLY a JSON array; one object per \
             candidate id: {{\"id\",\"include\",\"relevance\",\"category\",\"reason\"}}.",
            profile.render(),
            batch,
            top_k
        )
    }
}

#[async_trait::async_trait]
impl RankingClient for HostedRanker {
    async fn rank(
        &self,
        candidates: &[RankCandidate],
        profile: &InterestProfile,
        top_k: usize,
    ) -> Result<Vec<RankedItem>> {
        if self.api_key.is_empty() {
            bail!("RANKER_API_KEY is not set");
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let sys = "You rank chat messages against an interest profile. \
                   Output only strict JSON, no prose.";
        let user = Self::prompt(candidates, profile, top_k);
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: sys,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.2,
        };

        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("ranking request")?
            .error_for_status()
            .context("ranking non-2xx")?;

        let body: Resp = resp.json().await.context("ranking response body")?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");
        serde_json::from_str::<Vec<RankedItem>>(content.trim())
            .context("ranking response is not a JSON array of ranked items")
    }

    fn provider_name(&self) -> &'static str {
        "hosted"
    }
}

/// Always errors; curation cycles abort cleanly while ranking is off.
pub struct DisabledRanker;

#[async_trait::async_trait]
impl RankingClient for DisabledRanker {
    async fn rank(
        &self,
        _candidates: &[RankCandidate],
        _profile: &InterestProfile,
        _top_k: usize,
    ) -> Result<Vec<RankedItem>> {
        bail!("ranking is disabled")
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

// ------------------------------------------------------------
// Test double
// ------------------------------------------------------------

/// Deterministic in-process ranker. Scripted responses are served first;
/// otherwise the first `top_k` candidates in batch order are selected with
/// descending relevance.
#[derive(Default)]
pub struct MockRanker {
    responses: Mutex<std::collections::VecDeque<Result<Vec<RankedItem>, String>>>,
    calls: AtomicUsize,
}

impl MockRanker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Result<Vec<RankedItem>, String>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn default_response(candidates: &[RankCandidate], top_k: usize) -> Vec<RankedItem> {
        candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let include = i < top_k;
                RankedItem {
                    id: c.id.clone(),
                    include,
                    relevance: if include {
                        0.9 - 0.1 * i as f32
                    } else {
                        0.2
                    },
                    category: "general".to_string(),
                    reason: "mock ranking".to_string(),
                }
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl RankingClient for MockRanker {
    async fn rank(
        &self,
        candidates: &[RankCandidate],
        _profile: &InterestProfile,
        top_k: usize,
    ) -> Result<Vec<RankedItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.responses.lock().unwrap().pop_front() {
            return scripted.map_err(|e| anyhow::anyhow!(e));
        }
        Ok(Self::default_response(candidates, top_k))
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}
