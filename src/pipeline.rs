// src/pipeline.rs
// Processing orchestrator. One cycle: select a batch, score quality for
// every item (Stage A), gate the cheap ones out, then summarize (B),
// synthesize trends over groups (C), and prioritize alerts (D). Each stage's
// results are committed before the next stage reads them; one item's failure
// never aborts the batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, gauge};
use tokio::sync::Semaphore;

use crate::agents::registry::AgentRegistry;
use crate::agents::{AgentInput, AgentRun};
use crate::config::{BatchConfig, TrendGrouping, TrendsConfig};
use crate::domain::{AgentKind, Item, ProcessingState};
use crate::error::PersistenceError;
use crate::ledger::PerformanceLedger;
use crate::store::{NewAlert, Store};

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ProcessingReport {
    pub selected: usize,
    pub fully_processed: usize,
    pub minimal_processed: usize,
    pub partially_processed: usize,
    pub permanently_failed: usize,
    pub fallback_count: usize,
    pub alerts_emitted: usize,
}

/// Per-item bookkeeping within one cycle.
struct Progress {
    item: Arc<Item>,
    prior_attempts: u32,
    fallbacks: usize,
    /// Set on the first persistence failure; the item sits out the rest of
    /// the cycle and retries next time.
    commit_failed: bool,
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    registry: Arc<AgentRegistry>,
    ledger: Arc<PerformanceLedger>,
    batch: BatchConfig,
    trends: TrendsConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<AgentRegistry>,
        ledger: Arc<PerformanceLedger>,
        batch: BatchConfig,
        trends: TrendsConfig,
    ) -> Self {
        Self {
            store,
            registry,
            ledger,
            batch,
            trends,
        }
    }

    /// Run one processing cycle. Errors never escape: per-item failures are
    /// recorded in the report and the item stays eligible for the next cycle.
    pub async fn run_cycle(&self) -> ProcessingReport {
        let cycle_start = Instant::now();
        let mut report = ProcessingReport::default();

        let batch = match self.store.select_batch(self.batch.max_batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "batch selection failed, skipping cycle");
                return report;
            }
        };
        report.selected = batch.len();
        if batch.is_empty() {
            return report;
        }
        tracing::info!(selected = batch.len(), "processing cycle started");

        let mut progress: Vec<Progress> = batch
            .into_iter()
            .map(|(item, state)| Progress {
                item: Arc::new(item),
                prior_attempts: state.attempts(),
                fallbacks: 0,
                commit_failed: false,
            })
            .collect();

        // ---- Stage A: quality for every item in the batch ----
        let quality_runs = self
            .run_stage_for_items(
                AgentKind::ScoreQuality,
                progress.iter().map(|p| p.item.clone()).collect(),
            )
            .await;

        let mut scores: HashMap<u64, f32> = HashMap::new();
        for (item_id, run) in &quality_runs {
            let idx = progress
                .iter()
                .position(|p| p.item.id == *item_id)
                .expect("stage A run for selected item");
            if run.used_fallback {
                progress[idx].fallbacks += 1;
            }
            if let Err(e) = self.commit(run, *item_id).await {
                tracing::error!(item = item_id, error = %e, "stage A commit failed");
                progress[idx].commit_failed = true;
                continue;
            }
            scores.insert(*item_id, run.output.quality_score().unwrap_or(0.0));
        }

        // ---- Gate: below-threshold items are done (minimal) ----
        let mut survivors: Vec<usize> = Vec::new();
        for (idx, p) in progress.iter().enumerate() {
            if p.commit_failed {
                continue;
            }
            let score = scores.get(&p.item.id).copied().unwrap_or(0.0);
            // Equal-to-threshold is inclusive.
            if score >= self.batch.quality_threshold {
                survivors.push(idx);
            } else {
                if let Err(e) = self
                    .store
                    .set_state(p.item.id, ProcessingState::MinimalProcessed)
                    .await
                {
                    tracing::error!(item = p.item.id, error = %e, "state update failed");
                }
                report.minimal_processed += 1;
                counter!("pipeline_gated_out_total").increment(1);
            }
        }

        // ---- Stage B: summarize survivors ----
        let mut deadline_hit = !self.deadline_left(cycle_start);
        let mut summaries: HashMap<u64, String> = HashMap::new();
        if !deadline_hit {
            let items: Vec<Arc<Item>> = survivors
                .iter()
                .filter(|&&i| !progress[i].commit_failed)
                .map(|&i| progress[i].item.clone())
                .collect();
            let runs = self.run_stage_for_items(AgentKind::Summarize, items).await;
            for (item_id, run) in &runs {
                let idx = progress
                    .iter()
                    .position(|p| p.item.id == *item_id)
                    .expect("stage B run for surviving item");
                if run.used_fallback {
                    progress[idx].fallbacks += 1;
                }
                if let Err(e) = self.commit(run, *item_id).await {
                    tracing::error!(item = item_id, error = %e, "stage B commit failed");
                    progress[idx].commit_failed = true;
                    continue;
                }
                summaries.insert(
                    *item_id,
                    run.output.summary_text().unwrap_or_default().to_string(),
                );
            }
        }

        // ---- Stage C: trend synthesis over groups ----
        deadline_hit = deadline_hit || !self.deadline_left(cycle_start);
        let mut trend_context: HashMap<u64, Vec<String>> = HashMap::new();
        if !deadline_hit {
            let alive: Vec<Arc<Item>> = survivors
                .iter()
                .filter(|&&i| !progress[i].commit_failed)
                .map(|&i| progress[i].item.clone())
                .collect();
            for (label, members) in group_for_trends(&alive, &self.trends) {
                let input = AgentInput::Group {
                    label: label.clone(),
                    items: members.clone(),
                };
                let run = self.registry.run(AgentKind::SynthesizeTrends, &input).await;
                let insights: Vec<String> =
                    run.output.insights().map(|s| s.to_vec()).unwrap_or_default();

                for member in &members {
                    let idx = progress
                        .iter()
                        .position(|p| p.item.id == member.id)
                        .expect("stage C run for surviving item");
                    if run.used_fallback {
                        progress[idx].fallbacks += 1;
                    }
                    if let Err(e) = self.commit(&run, member.id).await {
                        tracing::error!(item = member.id, error = %e, "stage C commit failed");
                        progress[idx].commit_failed = true;
                        continue;
                    }
                    trend_context.insert(member.id, insights.clone());
                }
            }
        }

        // ---- Stage D: alert prioritization ----
        deadline_hit = deadline_hit || !self.deadline_left(cycle_start);
        if !deadline_hit {
            for &idx in &survivors {
                if progress[idx].commit_failed {
                    continue;
                }
                let item = progress[idx].item.clone();
                let input = AgentInput::AlertDraft {
                    item: item.clone(),
                    summary: summaries.get(&item.id).cloned().unwrap_or_default(),
                    trend_context: trend_context.get(&item.id).cloned().unwrap_or_default(),
                };
                let run = self.registry.run(AgentKind::PrioritizeAlert, &input).await;
                if run.used_fallback {
                    progress[idx].fallbacks += 1;
                }
                if let Err(e) = self.commit(&run, item.id).await {
                    tracing::error!(item = item.id, error = %e, "stage D commit failed");
                    progress[idx].commit_failed = true;
                    continue;
                }

                if let Some((score, level)) = run.output.priority() {
                    if score >= self.batch.alert_threshold {
                        let alert = NewAlert {
                            title: item.title.clone(),
                            message: summaries.get(&item.id).cloned().unwrap_or_default(),
                            category: item.category,
                            priority: level,
                            priority_score: score,
                            item_ids: vec![item.id],
                        };
                        match self.store.insert_alert(alert).await {
                            Ok(_) => {
                                report.alerts_emitted += 1;
                                counter!("pipeline_alerts_total").increment(1);
                            }
                            Err(e) => {
                                tracing::error!(item = item.id, error = %e, "alert insert failed");
                                progress[idx].commit_failed = true;
                            }
                        }
                    }
                }
            }
        }

        // ---- Finalize item states ----
        // Gated-out items were already marked minimal. Survivors that ran to
        // the end become fully processed; any commit failure yields a retry
        // (or permanent failure once attempts run out). When the deadline cut
        // the cycle short, untouched survivors keep their state and stay
        // eligible.
        for (idx, p) in progress.iter().enumerate() {
            if p.commit_failed {
                let attempts = p.prior_attempts + 1;
                let state = if attempts >= self.batch.max_item_attempts {
                    report.permanently_failed += 1;
                    tracing::warn!(item = p.item.id, attempts, "item permanently failed");
                    ProcessingState::PermanentlyFailed
                } else {
                    report.partially_processed += 1;
                    ProcessingState::PartiallyProcessed { attempts }
                };
                if let Err(e) = self.store.set_state(p.item.id, state).await {
                    tracing::error!(item = p.item.id, error = %e, "state update failed");
                }
            } else if survivors.contains(&idx) && !deadline_hit {
                report.fully_processed += 1;
                if let Err(e) = self
                    .store
                    .set_state(p.item.id, ProcessingState::FullyProcessed)
                    .await
                {
                    tracing::error!(item = p.item.id, error = %e, "state update failed");
                }
            }
        }
        for p in &progress {
            report.fallback_count += p.fallbacks;
        }

        counter!("pipeline_cycles_total").increment(1);
        gauge!("pipeline_last_cycle_ms").set(cycle_start.elapsed().as_secs_f64() * 1_000.0);
        tracing::info!(
            fully = report.fully_processed,
            minimal = report.minimal_processed,
            partial = report.partially_processed,
            failed = report.permanently_failed,
            fallbacks = report.fallback_count,
            alerts = report.alerts_emitted,
            "processing cycle done"
        );
        report
    }

    /// Run one per-item stage concurrently, bounded by `max_concurrency`.
    async fn run_stage_for_items(
        &self,
        kind: AgentKind,
        items: Vec<Arc<Item>>,
    ) -> Vec<(u64, AgentRun)> {
        let semaphore = Arc::new(Semaphore::new(self.batch.max_concurrency));
        let mut handles = Vec::with_capacity(items.len());
        for item in items {
            let semaphore = semaphore.clone();
            let registry = self.registry.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("stage semaphore closed");
                let input = AgentInput::Item(item.clone());
                let run = registry.run(kind, &input).await;
                (item.id, run)
            }));
        }

        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(pair) => out.push(pair),
                Err(e) => tracing::error!(stage = %kind, error = %e, "stage task panicked"),
            }
        }
        out
    }

    async fn commit(&self, run: &AgentRun, item_id: u64) -> Result<(), PersistenceError> {
        let result = run.to_result(item_id);
        self.store.commit_result(result.clone()).await?;
        // The ledger sees committed results only.
        self.ledger.record(&result);
        Ok(())
    }

    fn deadline_left(&self, cycle_start: Instant) -> bool {
        match self.batch.cycle_deadline() {
            Some(deadline) => {
                let left = cycle_start.elapsed() < deadline;
                if !left {
                    tracing::warn!("cycle deadline reached, no new stage work launched");
                }
                left
            }
            None => true,
        }
    }
}

/// Group items for trend synthesis. Strict category grouping by default;
/// the keyword-overlap policy merges categories whose dominant keywords are
/// near-identical (Jaro-Winkler).
pub fn group_for_trends(
    items: &[Arc<Item>],
    cfg: &TrendsConfig,
) -> Vec<(String, Vec<Arc<Item>>)> {
    use crate::agents::heuristic::top_keywords;

    let mut by_category: HashMap<&'static str, Vec<Arc<Item>>> = HashMap::new();
    for item in items {
        by_category
            .entry(item.category.as_str())
            .or_default()
            .push(item.clone());
    }
    let mut groups: Vec<(String, Vec<Arc<Item>>)> = by_category
        .into_iter()
        .map(|(label, members)| (label.to_string(), members))
        .collect();
    groups.sort_by(|a, b| a.0.cmp(&b.0));

    if cfg.grouping == TrendGrouping::Category || groups.len() < 2 {
        return groups;
    }

    // Keyword-overlap policy: merge category groups with similar top keywords.
    let keyword_of = |members: &[Arc<Item>]| -> Option<String> {
        let titles: Vec<&str> = members.iter().map(|i| i.title.as_str()).collect();
        top_keywords(&titles, 1).into_iter().next()
    };

    let mut merged: Vec<(String, Vec<Arc<Item>>)> = Vec::new();
    'outer: for (label, members) in groups {
        let kw = keyword_of(&members);
        if let Some(kw) = &kw {
            for (m_label, m_members) in merged.iter_mut() {
                if let Some(m_kw) = keyword_of(m_members) {
                    if strsim::jaro_winkler(kw, &m_kw) >= cfg.min_keyword_similarity {
                        *m_label = format!("{m_label}+{label}");
                        m_members.extend(members);
                        continue 'outer;
                    }
                }
            }
        }
        merged.push((label, members));
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrendsConfig;
    use crate::domain::Category;
    use chrono::Utc;

    fn item(id: u64, category: Category, title: &str) -> Arc<Item> {
        Arc::new(Item {
            id,
            source_id: "feed:t".into(),
            external_id: format!("e{id}"),
            category,
            published_at: None,
            collected_at: Utc::now(),
            title: title.into(),
            body: String::new(),
            content_hash: format!("h{id}"),
        })
    }

    #[test]
    fn category_grouping_is_strict() {
        let items = vec![
            item(1, Category::Ai, "Model release"),
            item(2, Category::Science, "Fusion record"),
            item(3, Category::Ai, "Model benchmark"),
        ];
        let cfg = TrendsConfig::default();
        let groups = group_for_trends(&items, &cfg);
        assert_eq!(groups.len(), 2);
        let ai = groups.iter().find(|(l, _)| l == "ai").unwrap();
        assert_eq!(ai.1.len(), 2);
    }

    #[test]
    fn keyword_overlap_merges_similar_groups() {
        let items = vec![
            item(1, Category::Ai, "Quantum processors arrive"),
            item(2, Category::Science, "Quantum processors validated"),
        ];
        let cfg = TrendsConfig {
            grouping: TrendGrouping::KeywordOverlap,
            min_keyword_similarity: 0.9,
        };
        let groups = group_for_trends(&items, &cfg);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1.len(), 2);

        // Dissimilar keywords stay apart.
        let items = vec![
            item(1, Category::Ai, "Robotics factories expand"),
            item(2, Category::Science, "Volcano monitoring improves"),
        ];
        let groups = group_for_trends(&items, &cfg);
        assert_eq!(groups.len(), 2);
    }
}
