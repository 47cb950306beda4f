// src/ledger.rs
// Performance/cost ledger: sole writer of the per-agent aggregates, driven
// exclusively by committed analysis results. Updates and snapshots are both
// O(1); no history rescans.

use std::collections::HashMap;
use std::sync::Mutex;

use metrics::{counter, gauge};
use serde::Serialize;

use crate::domain::{AgentKind, AgentPerformance, AnalysisResult};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PerformanceSnapshot {
    pub total_analyses: u64,
    pub success_rate: f64,
    pub fallback_count: u64,
    pub avg_processing_time_ms: f64,
    pub total_token_usage: u64,
    pub total_cost: f64,
}

#[derive(Default)]
pub struct PerformanceLedger {
    inner: Mutex<HashMap<AgentKind, AgentPerformance>>,
}

impl PerformanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one committed result into the matching aggregate. Missing token
    /// and cost figures count as zero.
    pub fn record(&self, result: &AnalysisResult) {
        let mut g = self.inner.lock().expect("ledger mutex poisoned");
        let perf = g.entry(result.agent_kind).or_default();

        perf.total_analyses += 1;
        if result.success {
            perf.success_count += 1;
        }
        if result.used_fallback {
            perf.fallback_count += 1;
        }
        perf.total_processing_time_ms += result.processing_time_ms;
        perf.total_token_usage += result.token_usage.unwrap_or(0);
        perf.total_cost += result.cost_estimate.unwrap_or(0.0);

        counter!("ledger_results_total", "agent" => result.agent_kind.as_str()).increment(1);
        gauge!("ledger_total_cost_usd", "agent" => result.agent_kind.as_str())
            .set(perf.total_cost);
    }

    pub fn snapshot(&self, kind: AgentKind) -> PerformanceSnapshot {
        let g = self.inner.lock().expect("ledger mutex poisoned");
        let perf = g.get(&kind).copied().unwrap_or_default();
        snapshot_of(&perf)
    }

    pub fn snapshot_all(&self) -> Vec<(AgentKind, PerformanceSnapshot)> {
        let g = self.inner.lock().expect("ledger mutex poisoned");
        AgentKind::ALL
            .into_iter()
            .map(|kind| {
                let perf = g.get(&kind).copied().unwrap_or_default();
                (kind, snapshot_of(&perf))
            })
            .collect()
    }
}

fn snapshot_of(perf: &AgentPerformance) -> PerformanceSnapshot {
    let total = perf.total_analyses;
    PerformanceSnapshot {
        total_analyses: total,
        success_rate: if total == 0 {
            0.0
        } else {
            perf.success_count as f64 / total as f64
        },
        fallback_count: perf.fallback_count,
        avg_processing_time_ms: if total == 0 {
            0.0
        } else {
            perf.total_processing_time_ms as f64 / total as f64
        },
        total_token_usage: perf.total_token_usage,
        total_cost: perf.total_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn result(success: bool, cost: Option<f64>, time_ms: u64) -> AnalysisResult {
        AnalysisResult {
            item_id: 1,
            agent_kind: AgentKind::Summarize,
            success,
            payload: serde_json::json!({}),
            processing_time_ms: time_ms,
            token_usage: cost.map(|_| 100),
            cost_estimate: cost,
            created_at: Utc::now(),
            used_fallback: !success,
        }
    }

    #[test]
    fn success_rate_is_successes_over_total() {
        let ledger = PerformanceLedger::new();
        ledger.record(&result(true, Some(0.01), 10));
        ledger.record(&result(true, None, 20));
        ledger.record(&result(false, None, 30));

        let snap = ledger.snapshot(AgentKind::Summarize);
        assert_eq!(snap.total_analyses, 3);
        assert!((snap.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((snap.avg_processing_time_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn missing_cost_counts_as_zero() {
        let ledger = PerformanceLedger::new();
        ledger.record(&result(true, Some(0.25), 5));
        ledger.record(&result(true, None, 5));
        ledger.record(&result(true, Some(0.50), 5));

        let snap = ledger.snapshot(AgentKind::Summarize);
        assert!((snap.total_cost - 0.75).abs() < 1e-9);
    }

    #[test]
    fn untouched_agent_snapshots_as_zeroes() {
        let ledger = PerformanceLedger::new();
        let snap = ledger.snapshot(AgentKind::SynthesizeTrends);
        assert_eq!(snap.total_analyses, 0);
        assert_eq!(snap.success_rate, 0.0);
        assert_eq!(snap.total_cost, 0.0);
    }
}
