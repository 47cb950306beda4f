// src/agents/heuristic.rs
// Heuristic fallback variants: pure functions of the input, no I/O, always
// produce an output. These keep the pipeline moving when the AI backend is
// unavailable, rate limited, or unconfigured.

use std::collections::HashMap;

use chrono::Utc;

use crate::domain::Item;

use super::{level_for_score, AgentInput, AgentOutput};

const SUMMARY_MAX_CHARS: usize = 300;
const CRITICAL_KEYWORDS: [&str; 6] = [
    "breaking", "urgent", "critical", "emergency", "alert", "warning",
];

const STOPWORDS: [&str; 28] = [
    "the", "a", "an", "and", "or", "of", "to", "in", "on", "for", "with", "is", "are", "was",
    "were", "its", "it", "as", "at", "by", "be", "from", "that", "this", "new", "how", "why",
    "what",
];

/// Quality score in [0,1] from title/body shape and metadata completeness.
pub fn score_quality(item: &Item) -> AgentOutput {
    let mut score = 0.3f32;
    let mut factors = Vec::new();

    let title_len = item.title.chars().count();
    if (20..=100).contains(&title_len) {
        score += 0.15;
        factors.push("good_title_length".to_string());
    }

    if item.body.chars().count() > 500 {
        score += 0.2;
        factors.push("sufficient_content".to_string());
    }

    // Readability: average sentence length in words.
    let sentences: Vec<&str> = item
        .body
        .split(". ")
        .filter(|s| !s.trim().is_empty())
        .collect();
    if !sentences.is_empty() {
        let total_words: usize = sentences.iter().map(|s| s.split_whitespace().count()).sum();
        let avg = total_words as f32 / sentences.len() as f32;
        if (10.0..=25.0).contains(&avg) {
            score += 0.1;
            factors.push("good_readability".to_string());
        }
    }

    if item.published_at.is_some() {
        score += 0.1;
        factors.push("has_publish_date".to_string());
    }

    if !top_keywords(&[item.title.as_str()], 3).is_empty() {
        score += 0.05;
        factors.push("informative_title".to_string());
    }

    AgentOutput::Quality {
        score: score.min(1.0),
        factors,
        method: "heuristic",
    }
}

/// Extractive summary: first sentence plus last sentence, capped.
pub fn summarize(item: &Item) -> AgentOutput {
    let body = item.body.trim();
    let original_length = body.chars().count();

    let text = if body.is_empty() {
        item.title.clone()
    } else {
        let sentences: Vec<&str> = body.split(". ").filter(|s| !s.trim().is_empty()).collect();
        let mut summary = match sentences.as_slice() {
            [] => body.to_string(),
            [only] => only.to_string(),
            [first, .., last] if sentences.len() > 3 => format!("{first}. {last}"),
            _ => body.to_string(),
        };
        if summary.chars().count() > SUMMARY_MAX_CHARS {
            summary = summary.chars().take(SUMMARY_MAX_CHARS - 3).collect::<String>() + "...";
        }
        summary
    };

    AgentOutput::Summary {
        text,
        original_length,
        method: "heuristic",
    }
}

/// Frequency-based trend grouping over the group's titles.
pub fn synthesize_trends(label: &str, items: &[std::sync::Arc<Item>]) -> AgentOutput {
    let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
    let top = top_keywords(&titles, 5);

    let mut insights = Vec::new();
    if items.len() > 1 {
        insights.push(format!(
            "{} related items detected in group '{label}'",
            items.len()
        ));
    }
    if let Some(keyword) = top.first() {
        insights.push(format!("Top keyword in '{label}': {keyword}"));
    }
    if insights.is_empty() {
        insights.push(format!("Single item trend candidate in '{label}'"));
    }

    AgentOutput::Trends {
        insights,
        top_keywords: top,
        item_count: items.len(),
        method: "heuristic",
    }
}

/// Rule-based priority: critical keywords, trend corroboration, recency.
pub fn prioritize_alert(item: &Item, summary: &str, trend_context: &[String]) -> AgentOutput {
    let haystack = format!("{} {} {}", item.title, item.body, summary).to_lowercase();

    let mut score = 0.3f32;
    let mut factors = Vec::new();

    for keyword in CRITICAL_KEYWORDS {
        if haystack.contains(keyword) {
            score += 0.2;
            factors.push(format!("critical_keyword_{keyword}"));
        }
    }

    if !trend_context.is_empty() {
        score += 0.1;
        factors.push("trend_corroborated".to_string());
    }

    let age_hours = (Utc::now() - item.collected_at).num_minutes() as f32 / 60.0;
    if age_hours < 1.0 {
        score += 0.1;
        factors.push("time_sensitive".to_string());
    }

    let score = score.min(1.0);
    AgentOutput::AlertPriority {
        score,
        level: level_for_score(score),
        factors,
        method: "heuristic",
    }
}

/// Dispatch the heuristic variant for a capability. Always produces an
/// output; a group input for a per-item capability falls back to the first
/// member.
pub fn run(kind: crate::domain::AgentKind, input: &AgentInput) -> AgentOutput {
    use crate::domain::AgentKind::*;
    match (kind, input) {
        (ScoreQuality, _) => match input.primary_item() {
            Some(item) => score_quality(item),
            None => AgentOutput::Quality {
                score: 0.0,
                factors: vec!["empty_input".to_string()],
                method: "heuristic",
            },
        },
        (Summarize, _) => match input.primary_item() {
            Some(item) => summarize(item),
            None => AgentOutput::Summary {
                text: String::new(),
                original_length: 0,
                method: "heuristic",
            },
        },
        (SynthesizeTrends, AgentInput::Group { label, items }) => synthesize_trends(label, items),
        (SynthesizeTrends, _) => {
            let items: Vec<std::sync::Arc<Item>> = input
                .primary_item()
                .map(|i| vec![std::sync::Arc::new(i.clone())])
                .unwrap_or_default();
            synthesize_trends("ungrouped", &items)
        }
        (
            PrioritizeAlert,
            AgentInput::AlertDraft {
                item,
                summary,
                trend_context,
            },
        ) => prioritize_alert(item, summary, trend_context),
        (PrioritizeAlert, _) => match input.primary_item() {
            Some(item) => prioritize_alert(item, "", &[]),
            None => AgentOutput::AlertPriority {
                score: 0.0,
                level: crate::domain::AlertPriority::Low,
                factors: vec!["empty_input".to_string()],
                method: "heuristic",
            },
        },
    }
}

/// Most frequent non-stopword tokens across `texts`, ties broken
/// alphabetically for determinism.
pub fn top_keywords(texts: &[&str], k: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for text in texts {
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
        {
            let token = token.to_lowercase();
            if STOPWORDS.contains(&token.as_str()) {
                continue;
            }
            *counts.entry(token).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(k).map(|(w, _)| w).collect()
}
