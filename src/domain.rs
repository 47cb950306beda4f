// src/domain.rs
// Core entities shared across the pipeline. Items are immutable once the
// dedup gate admits them; processing state lives with the store, not on the
// entity. Analysis results are append-only: re-processing supersedes, never
// mutates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed content taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Ai,
    Science,
    International,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Ai => "ai",
            Category::Science => "science",
            Category::International => "international",
        }
    }
}

/// What kind of source an adapter speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Feed,
    Social,
    Trends,
}

/// Normalized adapter output. The wire format behind it (feed XML, social
/// JSON, trend samples) is the adapter's business, not ours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    /// Source-native identifier, e.g. a canonicalized URL or post id.
    pub external_id: String,
    pub title: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
    pub category: Category,
}

/// A unit of collected content after the dedup gate admitted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub source_id: String,
    pub external_id: String,
    pub category: Category,
    pub published_at: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
    /// SHA-256 over normalized title+body; catches re-published duplicates
    /// across sources with differing external ids.
    pub content_hash: String,
}

/// Analysis capabilities. Each has an AI-backed and a heuristic variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    ScoreQuality,
    Summarize,
    SynthesizeTrends,
    PrioritizeAlert,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::ScoreQuality,
        AgentKind::Summarize,
        AgentKind::SynthesizeTrends,
        AgentKind::PrioritizeAlert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::ScoreQuality => "score_quality",
            AgentKind::Summarize => "summarize",
            AgentKind::SynthesizeTrends => "synthesize_trends",
            AgentKind::PrioritizeAlert => "prioritize_alert",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one agent run against one item. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub item_id: u64,
    pub agent_kind: AgentKind,
    pub success: bool,
    /// Agent-specific structured output.
    pub payload: serde_json::Value,
    pub processing_time_ms: u64,
    pub token_usage: Option<u64>,
    pub cost_estimate: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub used_fallback: bool,
}

/// Store-owned processing state per item. The item itself stays immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ProcessingState {
    /// Not yet picked up by any processing cycle.
    Pending,
    /// Gated out by the quality threshold; stages B-D skipped.
    MinimalProcessed,
    /// A stage failed this cycle; eligible again next cycle.
    PartiallyProcessed { attempts: u32 },
    FullyProcessed,
    /// Exhausted cycle-level retries; excluded from automatic retries.
    PermanentlyFailed,
}

impl ProcessingState {
    /// Whether a processing cycle may pick this item up.
    pub fn eligible(&self) -> bool {
        matches!(
            self,
            ProcessingState::Pending | ProcessingState::PartiallyProcessed { .. }
        )
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ProcessingState::PartiallyProcessed { attempts } => *attempts,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// Emitted by Stage D when an item's priority score clears the alert
/// threshold. Holds item ids by value only; no back-references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub title: String,
    pub message: String,
    pub category: Category,
    pub priority: AlertPriority,
    pub priority_score: f32,
    pub item_ids: Vec<u64>,
    pub created_at: DateTime<Utc>,
}

/// Display-only health classification; never gates the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

/// Per-source collection bookkeeping, mutated at the scheduler/adapter
/// boundary on every collection attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    pub source_id: String,
    pub last_collected_at: Option<DateTime<Utc>>,
    pub collection_count: u64,
    pub consecutive_error_count: u32,
    pub total_error_count: u64,
}

impl SourceHealth {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            last_collected_at: None,
            collection_count: 0,
            consecutive_error_count: 0,
            total_error_count: 0,
        }
    }

    pub fn status(&self) -> HealthStatus {
        match self.consecutive_error_count {
            0 => HealthStatus::Healthy,
            1..=4 => HealthStatus::Degraded,
            _ => HealthStatus::Down,
        }
    }
}

/// Rolling per-agent aggregate, derived entirely from committed results.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub total_analyses: u64,
    pub success_count: u64,
    pub fallback_count: u64,
    pub total_processing_time_ms: u64,
    pub total_token_usage: u64,
    pub total_cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_thresholds() {
        let mut h = SourceHealth::new("feed:nature");
        assert_eq!(h.status(), HealthStatus::Healthy);
        h.consecutive_error_count = 1;
        assert_eq!(h.status(), HealthStatus::Degraded);
        h.consecutive_error_count = 4;
        assert_eq!(h.status(), HealthStatus::Degraded);
        h.consecutive_error_count = 5;
        assert_eq!(h.status(), HealthStatus::Down);
    }

    #[test]
    fn eligibility_follows_state() {
        assert!(ProcessingState::Pending.eligible());
        assert!(ProcessingState::PartiallyProcessed { attempts: 2 }.eligible());
        assert!(!ProcessingState::MinimalProcessed.eligible());
        assert!(!ProcessingState::FullyProcessed.eligible());
        assert!(!ProcessingState::PermanentlyFailed.eligible());
    }
}
