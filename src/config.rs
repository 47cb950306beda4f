// src/config.rs
// Pipeline configuration: TOML file + env overrides. Missing file falls back
// to defaults so the binary boots in a bare environment.

use std::{env, fs, path::Path, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::AgentKind;

pub const ENV_CONFIG_PATH: &str = "BRIEFWIRE_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/briefwire.toml";
/// Env var holding the AI credential when `api_key = "ENV"`.
pub const ENV_AI_API_KEY: &str = "AI_API_KEY";

fn default_collection_interval() -> u64 {
    1800
}
fn default_processing_interval() -> u64 {
    300
}
fn default_max_batch_size() -> usize {
    50
}
fn default_max_concurrency() -> usize {
    4
}
fn default_quality_threshold() -> f32 {
    0.5
}
fn default_alert_threshold() -> f32 {
    0.7
}
fn default_max_item_attempts() -> u32 {
    3
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_attempt_timeout_secs() -> u64 {
    30
}
fn default_circuit_failures() -> u32 {
    3
}
fn default_cooldown_secs() -> u64 {
    120
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_cost_per_1k() -> f64 {
    0.002
}
fn default_ai_tasks() -> Vec<AgentKind> {
    AgentKind::ALL.to_vec()
}
fn default_min_similarity() -> f64 {
    0.85
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,
    #[serde(default = "default_processing_interval")]
    pub processing_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            collection_interval_secs: default_collection_interval(),
            processing_interval_secs: default_processing_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Items scoring below this skip stages B-D. Equal-to-threshold proceeds.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f32,
    /// Stage D emits an Alert when the priority score reaches this.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f32,
    /// Cycle-level retries before an item is marked permanently failed.
    #[serde(default = "default_max_item_attempts")]
    pub max_item_attempts: u32,
    /// Optional cycle deadline: stop launching new stage work past this.
    #[serde(default)]
    pub cycle_deadline_secs: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_concurrency: default_max_concurrency(),
            quality_threshold: default_quality_threshold(),
            alert_threshold: default_alert_threshold(),
            max_item_attempts: default_max_item_attempts(),
            cycle_deadline_secs: None,
        }
    }
}

impl BatchConfig {
    pub fn cycle_deadline(&self) -> Option<Duration> {
        self.cycle_deadline_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive exhausted retry sequences before the circuit opens.
    #[serde(default = "default_circuit_failures")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_circuit_failures(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Items with a known `published_at` older than this are rejected.
    #[serde(default)]
    pub minimum_published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from $AI_API_KEY at load time. Empty disables the
    /// AI-backed variants (heuristics still run).
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_cost_per_1k")]
    pub cost_per_1k_tokens: f64,
    /// Capabilities with AI backing; others always use the heuristic variant.
    #[serde(default = "default_ai_tasks")]
    pub tasks: Vec<AgentKind>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: String::new(),
            cost_per_1k_tokens: default_cost_per_1k(),
            tasks: default_ai_tasks(),
        }
    }
}

impl AiConfig {
    /// A task is credentialed when AI is enabled, a key resolved, and the
    /// task is in the configured set.
    pub fn credentialed(&self, kind: AgentKind) -> bool {
        self.enabled && !self.api_key.is_empty() && self.tasks.contains(&kind)
    }
}

/// How Stage C groups items for trend synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendGrouping {
    /// Strict category + time-window grouping.
    Category,
    /// Merge groups across categories when top keywords overlap.
    KeywordOverlap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendsConfig {
    #[serde(default = "TrendsConfig::default_grouping")]
    pub grouping: TrendGrouping,
    /// Jaro-Winkler similarity needed to merge keyword groups.
    #[serde(default = "default_min_similarity")]
    pub min_keyword_similarity: f64,
}

impl TrendsConfig {
    fn default_grouping() -> TrendGrouping {
        TrendGrouping::Category
    }
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self {
            grouping: TrendGrouping::Category,
            min_keyword_similarity: default_min_similarity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit: CircuitConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub trends: TrendsConfig,
}

impl PipelineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut cfg: PipelineConfig = toml::from_str(&data)?;
        cfg.resolve_env();
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load from $BRIEFWIRE_CONFIG_PATH, then the default path, then defaults.
    pub fn load_default() -> Self {
        let path = env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        match Self::load_from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!(path = %path, error = %e, "config not loaded, using defaults");
                let mut cfg = PipelineConfig::default();
                cfg.resolve_env();
                cfg
            }
        }
    }

    fn resolve_env(&mut self) {
        if self.ai.api_key.trim().eq_ignore_ascii_case("env") {
            self.ai.api_key = env::var(ENV_AI_API_KEY).unwrap_or_default();
        }
    }

    fn sanitize(&mut self) {
        if !(0.0..=1.0).contains(&self.batch.quality_threshold) {
            self.batch.quality_threshold = default_quality_threshold();
        }
        if !(0.0..=1.0).contains(&self.batch.alert_threshold) {
            self.batch.alert_threshold = default_alert_threshold();
        }
        if self.retry.backoff_factor < 1.0 {
            self.retry.backoff_factor = default_backoff_factor();
        }
        if self.batch.max_batch_size == 0 {
            self.batch.max_batch_size = default_max_batch_size();
        }
        if self.batch.max_concurrency == 0 {
            self.batch.max_concurrency = 1;
        }
        if !(0.0..=1.0).contains(&self.trends.min_keyword_similarity) {
            self.trends.min_keyword_similarity = default_min_similarity();
        }
    }
}
