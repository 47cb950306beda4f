// src/agents/registry.rs
// Capability registry: owns the per-kind AI backends, circuit breakers, and
// the retry policy. `run` never fails; the caller always gets an output for
// the requested capability.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};

use crate::circuit::{CircuitBreaker, CircuitStats};
use crate::config::PipelineConfig;
use crate::domain::AgentKind;
use crate::retry::{call_with_retry, RetryPolicy};

use super::backend::{build_prompt, parse_ai_output, AiBackend, HttpBackend};
use super::{heuristic, AgentInput, AgentRun};

pub struct AgentRegistry {
    backends: HashMap<AgentKind, Arc<dyn AiBackend>>,
    circuits: HashMap<AgentKind, CircuitBreaker>,
    policy: RetryPolicy,
    cost_per_1k_tokens: f64,
}

impl AgentRegistry {
    pub fn new(policy: RetryPolicy, failure_threshold: u32, cooldown: Duration) -> Self {
        let circuits = AgentKind::ALL
            .into_iter()
            .map(|kind| {
                (
                    kind,
                    CircuitBreaker::new(kind.as_str(), failure_threshold, cooldown),
                )
            })
            .collect();
        Self {
            backends: HashMap::new(),
            circuits,
            policy,
            cost_per_1k_tokens: 0.0,
        }
    }

    /// Build from config: installs the HTTP backend for every credentialed
    /// task; everything else stays heuristic-only.
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        let mut registry = Self::new(
            RetryPolicy::from_config(&cfg.retry),
            cfg.circuit.failure_threshold,
            Duration::from_secs(cfg.circuit.cooldown_secs),
        )
        .with_cost_per_1k_tokens(cfg.ai.cost_per_1k_tokens);

        for kind in AgentKind::ALL {
            if cfg.ai.credentialed(kind) {
                match HttpBackend::from_config(&cfg.ai) {
                    Ok(backend) => {
                        registry = registry.with_backend(kind, Arc::new(backend));
                    }
                    Err(e) => {
                        tracing::warn!(agent = %kind, error = %e, "AI backend not built");
                    }
                }
            }
        }
        registry
    }

    pub fn with_backend(mut self, kind: AgentKind, backend: Arc<dyn AiBackend>) -> Self {
        self.backends.insert(kind, backend);
        self
    }

    pub fn with_cost_per_1k_tokens(mut self, rate: f64) -> Self {
        self.cost_per_1k_tokens = rate;
        self
    }

    pub fn circuit(&self, kind: AgentKind) -> &CircuitBreaker {
        self.circuits
            .get(&kind)
            .expect("circuit exists for every agent kind")
    }

    pub fn circuit_stats(&self) -> Vec<(AgentKind, CircuitStats)> {
        AgentKind::ALL
            .into_iter()
            .map(|kind| (kind, self.circuit(kind).stats()))
            .collect()
    }

    /// Run one capability against one input. Never errors: AI failures fall
    /// back to the heuristic variant with `success: false`.
    pub async fn run(&self, kind: AgentKind, input: &AgentInput) -> AgentRun {
        let started = Instant::now();
        counter!("agent_runs_total", "agent" => kind.as_str()).increment(1);

        if let Some(backend) = self.backends.get(&kind) {
            let circuit = self.circuit(kind);
            if circuit.allow_request() {
                let prompt = build_prompt(kind, input);
                let attempt = call_with_retry(&self.policy, || backend.call(&prompt)).await;
                match attempt {
                    Ok(resp) => {
                        circuit.record_success();
                        let elapsed = started.elapsed();
                        histogram!("agent_call_ms", "agent" => kind.as_str())
                            .record(elapsed.as_secs_f64() * 1_000.0);

                        if let Some(output) = parse_ai_output(kind, &resp.text) {
                            let token_usage = resp.token_usage;
                            let cost = token_usage
                                .map(|t| t as f64 / 1_000.0 * self.cost_per_1k_tokens);
                            return AgentRun {
                                kind,
                                output,
                                success: true,
                                used_fallback: false,
                                processing_time_ms: elapsed.as_millis() as u64,
                                token_usage,
                                cost_estimate: cost,
                            };
                        }
                        tracing::warn!(agent = %kind, "unusable AI response, using fallback");
                        return self.fallback(kind, input, started, false);
                    }
                    Err(e) => {
                        if e.is_transient() {
                            circuit.record_failure();
                        } else {
                            circuit.trip();
                        }
                        counter!("agent_failures_total", "agent" => kind.as_str()).increment(1);
                        tracing::warn!(agent = %kind, error = %e, "AI call exhausted, using fallback");
                        return self.fallback(kind, input, started, false);
                    }
                }
            }
            // Circuit open: skip the AI path without burning latency or cost.
            counter!("agent_circuit_skips_total", "agent" => kind.as_str()).increment(1);
            return self.fallback(kind, input, started, true);
        }

        // No credential configured for this task.
        self.fallback(kind, input, started, true)
    }

    fn fallback(
        &self,
        kind: AgentKind,
        input: &AgentInput,
        started: Instant,
        clean: bool,
    ) -> AgentRun {
        let output = heuristic::run(kind, input);
        counter!("agent_fallbacks_total", "agent" => kind.as_str()).increment(1);
        AgentRun {
            kind,
            output,
            // `clean` distinguishes "heuristic was the selected variant"
            // from "AI was attempted and failed".
            success: clean,
            used_fallback: true,
            processing_time_ms: started.elapsed().as_millis() as u64,
            token_usage: None,
            cost_estimate: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::backend::MockBackend;
    use crate::circuit::CircuitState;
    use crate::domain::{Category, Item};
    use crate::error::AgentCallError;
    use chrono::Utc;

    fn sample_input() -> AgentInput {
        AgentInput::Item(Arc::new(Item {
            id: 7,
            source_id: "feed:t".into(),
            external_id: "x".into(),
            category: Category::Ai,
            published_at: None,
            collected_at: Utc::now(),
            title: "A reasonably descriptive headline for scoring".into(),
            body: "Body. More body. Even more body.".into(),
            content_hash: "h".into(),
        }))
    }

    #[tokio::test]
    async fn no_backend_means_clean_fallback() {
        let registry = AgentRegistry::new(RetryPolicy::immediate(1), 3, Duration::from_secs(60));
        let run = registry.run(AgentKind::ScoreQuality, &sample_input()).await;
        assert!(run.success);
        assert!(run.used_fallback);
        assert!(run.token_usage.is_none());
        assert!(run.cost_estimate.is_none());
    }

    #[tokio::test]
    async fn ai_success_reports_tokens_and_cost() {
        let backend = Arc::new(MockBackend::replying("0.9", Some(500)));
        let registry = AgentRegistry::new(RetryPolicy::immediate(1), 3, Duration::from_secs(60))
            .with_backend(AgentKind::ScoreQuality, backend.clone())
            .with_cost_per_1k_tokens(0.002);

        let run = registry.run(AgentKind::ScoreQuality, &sample_input()).await;
        assert!(run.success);
        assert!(!run.used_fallback);
        assert_eq!(run.token_usage, Some(500));
        let cost = run.cost_estimate.unwrap();
        assert!((cost - 0.001).abs() < 1e-9);
        assert_eq!(run.output.quality_score(), Some(0.9));
    }

    #[tokio::test]
    async fn exhausted_retries_fall_back_and_count_toward_circuit() {
        let backend = Arc::new(MockBackend::failing(AgentCallError::Transient(
            "503".into(),
        )));
        let registry = AgentRegistry::new(RetryPolicy::immediate(1), 2, Duration::from_secs(60))
            .with_backend(AgentKind::Summarize, backend.clone());

        let run = registry.run(AgentKind::Summarize, &sample_input()).await;
        assert!(!run.success);
        assert!(run.used_fallback);
        // 1 retry => 2 attempts per sequence.
        assert_eq!(backend.call_count(), 2);
        assert_eq!(
            registry.circuit(AgentKind::Summarize).state(),
            CircuitState::Closed
        );

        // Second exhausted sequence reaches the threshold and opens.
        let _ = registry.run(AgentKind::Summarize, &sample_input()).await;
        assert_eq!(
            registry.circuit(AgentKind::Summarize).state(),
            CircuitState::Open
        );

        // Open circuit: no further backend calls.
        let before = backend.call_count();
        let run = registry.run(AgentKind::Summarize, &sample_input()).await;
        assert_eq!(backend.call_count(), before);
        assert!(run.used_fallback);
        assert!(run.success);
    }

    #[tokio::test]
    async fn permanent_error_opens_circuit_immediately() {
        let backend = Arc::new(MockBackend::failing(AgentCallError::Permanent(
            "bad key".into(),
        )));
        let registry = AgentRegistry::new(RetryPolicy::immediate(3), 5, Duration::from_secs(60))
            .with_backend(AgentKind::PrioritizeAlert, backend.clone());

        let run = registry.run(AgentKind::PrioritizeAlert, &sample_input()).await;
        assert!(!run.success);
        // Permanent: one attempt, no retries, circuit open despite threshold 5.
        assert_eq!(backend.call_count(), 1);
        assert_eq!(
            registry.circuit(AgentKind::PrioritizeAlert).state(),
            CircuitState::Open
        );
    }
}
