// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_PATH: &str = "CURATOR_CONFIG_PATH";
pub const ENV_PROFILE_PATH: &str = "CURATOR_PROFILE_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/curator.toml";
pub const DEFAULT_PROFILE_PATH: &str = "config/profile.toml";

fn default_min_text_len() -> usize {
    3
}
fn default_max_text_len() -> usize {
    4000
}
fn default_true() -> bool {
    true
}
fn default_max_per_minute() -> u32 {
    10
}
fn default_delay_min_ms() -> u64 {
    800
}
fn default_delay_max_ms() -> u64 {
    2_500
}
fn default_capacity() -> usize {
    500
}
fn default_concurrency() -> usize {
    3
}
fn default_top_k() -> usize {
    3
}
fn default_pacing_ms() -> u64 {
    2_000
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_store_path() -> PathBuf {
    PathBuf::from("data/messages.json")
}
fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/relevant.json")
}
fn default_autosave_secs() -> u64 {
    300
}
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Message admission filters (§4.3 step 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,
    #[serde(default = "default_max_text_len")]
    pub max_text_len: usize,
    #[serde(default)]
    pub allow_media: bool,
    #[serde(default = "default_true")]
    pub allow_forwarded: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_text_len: default_min_text_len(),
            max_text_len: default_max_text_len(),
            allow_media: false,
            allow_forwarded: true,
        }
    }
}

/// Per-source rate limiting and the optional human-like accept delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_max_per_minute")]
    pub max_messages_per_minute: u32,
    #[serde(default)]
    pub human_delay: bool,
    #[serde(default = "default_delay_min_ms")]
    pub delay_min_ms: u64,
    #[serde(default = "default_delay_max_ms")]
    pub delay_max_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_messages_per_minute: default_max_per_minute(),
            human_delay: false,
            delay_min_ms: default_delay_min_ms(),
            delay_max_ms: default_delay_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratorConfig {
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    /// Ledger capacity per source; oldest messages are evicted first.
    #[serde(default = "default_capacity")]
    pub max_messages_per_source: usize,
    /// Dispatch queue worker limit.
    #[serde(default = "default_concurrency")]
    pub queue_concurrency: usize,
    /// How many records a curation cycle may select.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Destination id for curated notifications.
    #[serde(default)]
    pub notify_destination: String,
    /// Pause between consecutive notification sends.
    #[serde(default = "default_pacing_ms")]
    pub notify_pacing_ms: u64,
    /// Metadata cache TTL.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    /// Periodic snapshot interval; 0 disables the autosave task.
    #[serde(default = "default_autosave_secs")]
    pub autosave_secs: u64,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub ranker: RankerConfig,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        // Serde fills every field from its default fn on an empty document.
        toml::from_str("").expect("empty config must deserialize")
    }
}

/// Hosted ranking provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankerConfig {
    #[serde(default)]
    pub enabled: bool,
    /// "hosted" is the only real provider; anything else resolves to disabled.
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_ranker_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ranker_timeout_secs() -> u64 {
    20
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: String::new(),
            api_url: String::new(),
            model: String::new(),
            timeout_secs: default_ranker_timeout_secs(),
        }
    }
}

impl CuratorConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading curator config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = parse_config(&content, ext.as_str())?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load using env var + fallback:
    /// 1) $CURATOR_CONFIG_PATH
    /// 2) config/curator.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let toml_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        Ok(Self::default())
    }

    /// Clamp obviously invalid values instead of failing startup.
    fn sanitize(&mut self) {
        if self.filters.min_text_len > self.filters.max_text_len {
            std::mem::swap(&mut self.filters.min_text_len, &mut self.filters.max_text_len);
        }
        if self.throttle.delay_min_ms > self.throttle.delay_max_ms {
            std::mem::swap(
                &mut self.throttle.delay_min_ms,
                &mut self.throttle.delay_max_ms,
            );
        }
        self.throttle.max_messages_per_minute = self.throttle.max_messages_per_minute.max(1);
        self.max_messages_per_source = self.max_messages_per_source.max(1);
        self.queue_concurrency = self.queue_concurrency.max(1);
        self.top_k = self.top_k.max(1);
    }

    /// Minimum interval between accepted messages for one source.
    pub fn min_accept_interval_ms(&self) -> i64 {
        60_000 / i64::from(self.throttle.max_messages_per_minute)
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<CuratorConfig> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("parsing JSON curator config");
    }
    // TOML is the primary format; fall back to JSON for unhinted content.
    match toml::from_str(s) {
        Ok(cfg) => Ok(cfg),
        Err(toml_err) => serde_json::from_str(s)
            .map_err(|_| anyhow!("unsupported curator config format: {toml_err}")),
    }
}

/// Standing interest profile the ranking capability scores candidates
/// against. Static per deployment; hot-reloadable via the admin surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterestProfile {
    /// Free-text description of what the operator cares about.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl InterestProfile {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading interest profile from {}", path.display()))?;
        toml::from_str(&content).context("parsing interest profile")
    }

    /// Env-var path override, then the conventional location, then empty.
    pub fn load_default() -> Self {
        let path = std::env::var(ENV_PROFILE_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_PROFILE_PATH));
        match Self::load_from(&path) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = ?e, "interest profile unavailable, using empty profile");
                Self::default()
            }
        }
    }

    /// One-line rendering used in ranking prompts.
    pub fn render(&self) -> String {
        if self.topics.is_empty() {
            self.description.clone()
        } else {
            format!("{} Topics: {}", self.description, self.topics.join(", "))
        }
    }
}
