// src/metrics.rs

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        metrics::describe_counter!("dedup_admitted_total", "Items admitted by the dedup gate.");
        metrics::describe_counter!(
            "dedup_rejected_total",
            "Items rejected by the dedup gate, labeled by reason."
        );
        metrics::describe_counter!("collect_new_items_total", "New items stored per source.");
        metrics::describe_counter!("collect_errors_total", "Adapter collection failures.");
        metrics::describe_counter!("collect_invalid_total", "Raw items dropped by validation.");
        metrics::describe_counter!("agent_runs_total", "Agent runs, labeled by agent kind.");
        metrics::describe_counter!(
            "agent_failures_total",
            "AI call sequences that exhausted their retries."
        );
        metrics::describe_counter!("agent_fallbacks_total", "Heuristic fallback runs.");
        metrics::describe_counter!(
            "agent_circuit_skips_total",
            "AI calls skipped because the circuit was open."
        );
        metrics::describe_counter!("circuit_opened_total", "Circuit breaker open transitions.");
        metrics::describe_counter!("ledger_results_total", "Results folded into the ledger.");
        metrics::describe_counter!("pipeline_cycles_total", "Completed processing cycles.");
        metrics::describe_counter!("pipeline_gated_out_total", "Items gated out by quality.");
        metrics::describe_counter!("pipeline_alerts_total", "Alerts emitted by stage D.");
        metrics::describe_counter!(
            "jobs_skipped_total",
            "Job triggers skipped by single-flight."
        );
        metrics::describe_histogram!("agent_call_ms", "Successful AI call latency.");
        metrics::describe_gauge!("ledger_total_cost_usd", "Accumulated cost per agent kind.");
        metrics::describe_gauge!("pipeline_last_cycle_ms", "Duration of the last cycle.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Initialize the Prometheus recorder.
    pub fn init() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("prometheus: install recorder");
        ensure_metrics_described();
        Self { handle }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
