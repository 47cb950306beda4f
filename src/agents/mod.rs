// src/agents/mod.rs
// Analysis capabilities. Each capability has an AI-backed variant (network,
// behind retry + circuit) and a heuristic variant (pure function of the
// input, never fails). Selection lives in the registry, not at call sites.

pub mod backend;
pub mod heuristic;
pub mod registry;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::domain::{AgentKind, AlertPriority, AnalysisResult, Item};

/// Input to one agent run. Trend synthesis consumes groups; alert
/// prioritization consumes the item plus upstream stage output.
#[derive(Debug, Clone)]
pub enum AgentInput {
    Item(Arc<Item>),
    Group {
        label: String,
        items: Vec<Arc<Item>>,
    },
    AlertDraft {
        item: Arc<Item>,
        summary: String,
        trend_context: Vec<String>,
    },
}

impl AgentInput {
    pub fn primary_item(&self) -> Option<&Item> {
        match self {
            AgentInput::Item(item) => Some(item),
            AgentInput::AlertDraft { item, .. } => Some(item),
            AgentInput::Group { items, .. } => items.first().map(|i| i.as_ref()),
        }
    }
}

/// Agent-specific structured output; serialized into the result payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentOutput {
    Quality {
        score: f32,
        factors: Vec<String>,
        method: &'static str,
    },
    Summary {
        text: String,
        original_length: usize,
        method: &'static str,
    },
    Trends {
        insights: Vec<String>,
        top_keywords: Vec<String>,
        item_count: usize,
        method: &'static str,
    },
    AlertPriority {
        score: f32,
        level: AlertPriority,
        factors: Vec<String>,
        method: &'static str,
    },
}

impl AgentOutput {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn quality_score(&self) -> Option<f32> {
        match self {
            AgentOutput::Quality { score, .. } => Some(*score),
            _ => None,
        }
    }

    pub fn summary_text(&self) -> Option<&str> {
        match self {
            AgentOutput::Summary { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn insights(&self) -> Option<&[String]> {
        match self {
            AgentOutput::Trends { insights, .. } => Some(insights),
            _ => None,
        }
    }

    pub fn priority(&self) -> Option<(f32, AlertPriority)> {
        match self {
            AgentOutput::AlertPriority { score, level, .. } => Some((*score, *level)),
            _ => None,
        }
    }
}

/// Outcome of one registry run, before it is bound to an item id. The
/// orchestrator fans a group outcome out to every member item.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub kind: AgentKind,
    pub output: AgentOutput,
    pub success: bool,
    pub used_fallback: bool,
    pub processing_time_ms: u64,
    pub token_usage: Option<u64>,
    pub cost_estimate: Option<f64>,
}

impl AgentRun {
    pub fn to_result(&self, item_id: u64) -> AnalysisResult {
        AnalysisResult {
            item_id,
            agent_kind: self.kind,
            success: self.success,
            payload: self.output.to_value(),
            processing_time_ms: self.processing_time_ms,
            token_usage: self.token_usage,
            cost_estimate: self.cost_estimate,
            created_at: Utc::now(),
            used_fallback: self.used_fallback,
        }
    }
}

pub fn level_for_score(score: f32) -> AlertPriority {
    if score >= 0.9 {
        AlertPriority::Critical
    } else if score > 0.7 {
        AlertPriority::High
    } else if score > 0.4 {
        AlertPriority::Medium
    } else {
        AlertPriority::Low
    }
}
