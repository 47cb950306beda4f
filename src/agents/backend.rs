// src/agents/backend.rs
// AI backend contract plus the HTTP chat-completions implementation. The
// exact wire protocol is a pluggable detail; the pipeline only relies on
// `call(prompt) -> {text, token_usage} | AgentCallError`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AiConfig;
use crate::domain::AgentKind;
use crate::error::AgentCallError;

use super::{level_for_score, AgentInput, AgentOutput};

#[derive(Debug, Clone)]
pub struct AiResponse {
    pub text: String,
    pub token_usage: Option<u64>,
}

#[async_trait]
pub trait AiBackend: Send + Sync {
    async fn call(&self, prompt: &str) -> Result<AiResponse, AgentCallError>;
    fn name(&self) -> &'static str;
    /// Whether calls leave the process. Heuristic variants never do; this
    /// is the backend-side declaration.
    fn requires_network(&self) -> bool {
        true
    }
}

/// Chat-completions style HTTP backend.
pub struct HttpBackend {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpBackend {
    pub fn from_config(cfg: &AiConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("briefwire/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
        })
    }
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
    max_tokens: u32,
}

#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u64,
}

const SYSTEM_PROMPT: &str = "You are an analysis agent for a content intelligence pipeline. \
Answer exactly in the format the instruction asks for, nothing else.";

#[async_trait]
impl AiBackend for HttpBackend {
    async fn call(&self, prompt: &str) -> Result<AiResponse, AgentCallError> {
        if self.api_key.is_empty() {
            return Err(AgentCallError::Permanent("missing API key".into()));
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.2,
            max_tokens: 400,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| AgentCallError::Transient(format!("http send: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            // 401/403: credential problem. 400: malformed request. Everything
            // else (429, 5xx) is worth retrying.
            let err = if status.as_u16() == 401 || status.as_u16() == 403 {
                AgentCallError::Permanent(format!("auth rejected: {status}"))
            } else if status.as_u16() == 400 {
                AgentCallError::Permanent(format!("request rejected: {status}"))
            } else {
                AgentCallError::Transient(format!("backend status: {status}"))
            };
            return Err(err);
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| AgentCallError::Transient(format!("decode body: {e}")))?;

        let text = body
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(AgentCallError::Transient("empty completion".into()));
        }

        Ok(AiResponse {
            text,
            token_usage: body.usage.map(|u| u.total_tokens),
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Deterministic backend for tests and local runs: fixed reply or fixed
/// error, with a call counter for asserting network behavior.
pub struct MockBackend {
    reply: String,
    fail_with: Option<AgentCallError>,
    /// Fail this many leading calls before replying (for recovery tests).
    fail_first: u32,
    token_usage: Option<u64>,
    pub calls: std::sync::atomic::AtomicU32,
}

impl MockBackend {
    pub fn replying(reply: &str, token_usage: Option<u64>) -> Self {
        Self {
            reply: reply.to_string(),
            fail_with: None,
            fail_first: 0,
            token_usage,
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn failing(err: AgentCallError) -> Self {
        Self {
            reply: String::new(),
            fail_with: Some(err),
            fail_first: u32::MAX,
            token_usage: None,
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Fails the first `fail_first` calls with `err`, then replies.
    pub fn flaky(fail_first: u32, err: AgentCallError, reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            fail_with: Some(err),
            fail_first,
            token_usage: None,
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl AiBackend for MockBackend {
    async fn call(&self, _prompt: &str) -> Result<AiResponse, AgentCallError> {
        let n = self
            .calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match &self.fail_with {
            Some(e) if n < self.fail_first => Err(e.clone()),
            _ => Ok(AiResponse {
                text: self.reply.clone(),
                token_usage: self.token_usage,
            }),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    fn requires_network(&self) -> bool {
        false
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// Build the per-capability prompt for an input.
pub fn build_prompt(kind: AgentKind, input: &AgentInput) -> String {
    match (kind, input) {
        (AgentKind::ScoreQuality, _) => {
            let item = input.primary_item();
            format!(
                "Rate the editorial quality of this content from 0.0 to 1.0. \
                 Reply with the number only.\nTitle: {}\nBody: {}",
                item.map(|i| i.title.as_str()).unwrap_or_default(),
                truncate(item.map(|i| i.body.as_str()).unwrap_or_default(), 2000),
            )
        }
        (AgentKind::Summarize, _) => {
            let item = input.primary_item();
            format!(
                "Summarize this content in at most three sentences. Reply with \
                 the summary only.\nTitle: {}\nBody: {}",
                item.map(|i| i.title.as_str()).unwrap_or_default(),
                truncate(item.map(|i| i.body.as_str()).unwrap_or_default(), 4000),
            )
        }
        (AgentKind::SynthesizeTrends, AgentInput::Group { label, items }) => {
            let titles: Vec<String> = items.iter().map(|i| format!("- {}", i.title)).collect();
            format!(
                "These items were grouped under '{label}'. Name the common trend \
                 and up to four supporting observations, one per line.\n{}",
                titles.join("\n"),
            )
        }
        (AgentKind::SynthesizeTrends, _) => {
            "Name the trend suggested by this item, one line.".to_string()
        }
        (AgentKind::PrioritizeAlert, AgentInput::AlertDraft { item, summary, trend_context }) => {
            format!(
                "Score the alert priority of this content from 0.0 to 1.0. Reply \
                 with the number only.\nTitle: {}\nSummary: {}\nTrend context: {}",
                item.title,
                summary,
                trend_context.join("; "),
            )
        }
        (AgentKind::PrioritizeAlert, _) => {
            let item = input.primary_item();
            format!(
                "Score the alert priority of this content from 0.0 to 1.0. Reply \
                 with the number only.\nTitle: {}",
                item.map(|i| i.title.as_str()).unwrap_or_default(),
            )
        }
    }
}

/// Interpret backend text for a capability. `None` means the response was
/// unusable and the heuristic variant should stand in.
pub fn parse_ai_output(kind: AgentKind, text: &str) -> Option<AgentOutput> {
    match kind {
        AgentKind::ScoreQuality => {
            let score = first_float(text)?.clamp(0.0, 1.0);
            Some(AgentOutput::Quality {
                score,
                factors: vec!["model_scored".to_string()],
                method: "ai",
            })
        }
        AgentKind::Summarize => {
            let cleaned = text.trim();
            if cleaned.is_empty() {
                return None;
            }
            Some(AgentOutput::Summary {
                text: truncate(cleaned, 600),
                original_length: cleaned.chars().count(),
                method: "ai",
            })
        }
        AgentKind::SynthesizeTrends => {
            let insights: Vec<String> = text
                .lines()
                .map(|l| l.trim_start_matches(['-', '*', ' ']).trim().to_string())
                .filter(|l| !l.is_empty())
                .take(5)
                .collect();
            if insights.is_empty() {
                return None;
            }
            Some(AgentOutput::Trends {
                top_keywords: Vec::new(),
                item_count: 0,
                insights,
                method: "ai",
            })
        }
        AgentKind::PrioritizeAlert => {
            let score = first_float(text)?.clamp(0.0, 1.0);
            Some(AgentOutput::AlertPriority {
                score,
                level: level_for_score(score),
                factors: vec!["model_scored".to_string()],
                method: "ai",
            })
        }
    }
}

fn first_float(text: &str) -> Option<f32> {
    static RE_FLOAT: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re = RE_FLOAT.get_or_init(|| regex::Regex::new(r"\d+(?:\.\d+)?").unwrap());
    re.find(text)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quality_extracts_and_clamps_score() {
        let out = parse_ai_output(AgentKind::ScoreQuality, "Score: 0.85").unwrap();
        assert_eq!(out.quality_score(), Some(0.85));

        let out = parse_ai_output(AgentKind::ScoreQuality, "10").unwrap();
        assert_eq!(out.quality_score(), Some(1.0));

        assert!(parse_ai_output(AgentKind::ScoreQuality, "no number here").is_none());
    }

    #[test]
    fn parse_trends_splits_lines() {
        let out =
            parse_ai_output(AgentKind::SynthesizeTrends, "- quantum race\n- lab funding\n").unwrap();
        let insights = out.insights().unwrap();
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0], "quantum race");
    }

    #[test]
    fn parse_summary_rejects_empty() {
        assert!(parse_ai_output(AgentKind::Summarize, "   ").is_none());
        assert!(parse_ai_output(AgentKind::Summarize, "A fine summary.").is_some());
    }
}
