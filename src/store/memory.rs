// src/store/memory.rs

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    AgentKind, Alert, AnalysisResult, Item, ProcessingState, SourceHealth,
};
use crate::error::PersistenceError;

use super::{ItemInsert, NewAlert, NewItem, Store};

#[derive(Default)]
struct Inner {
    next_item_id: u64,
    next_alert_id: u64,
    items: Vec<Item>,
    /// (source_id, external_id) -> item id
    fingerprints: HashMap<(String, String), u64>,
    /// content hash -> item id
    hashes: HashMap<String, u64>,
    states: HashMap<u64, ProcessingState>,
    /// Current result per (item id, agent kind); commits supersede.
    results: HashMap<(u64, AgentKind), AnalysisResult>,
    alerts: Vec<Alert>,
    health: HashMap<String, SourceHealth>,
}

/// In-memory store with the same constraint semantics the pipeline expects
/// from a durable engine. Single mutex; every method is one atomic step.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_item(&self, item: NewItem) -> Result<ItemInsert, PersistenceError> {
        let mut g = self.inner.lock().expect("store mutex poisoned");

        let key = (item.source_id.clone(), item.external_id.clone());
        if g.fingerprints.contains_key(&key) {
            return Ok(ItemInsert::DuplicateExternalId);
        }
        if g.hashes.contains_key(&item.content_hash) {
            return Ok(ItemInsert::DuplicateContent);
        }

        g.next_item_id += 1;
        let id = g.next_item_id;
        let stored = Item {
            id,
            source_id: item.source_id,
            external_id: item.external_id,
            category: item.category,
            published_at: item.published_at,
            collected_at: item.collected_at,
            title: item.title,
            body: item.body,
            content_hash: item.content_hash,
        };
        g.fingerprints.insert(key, id);
        g.hashes.insert(stored.content_hash.clone(), id);
        g.states.insert(id, ProcessingState::Pending);
        g.items.push(stored.clone());
        Ok(ItemInsert::Inserted(stored))
    }

    async fn has_fingerprint(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> Result<bool, PersistenceError> {
        let g = self.inner.lock().expect("store mutex poisoned");
        Ok(g.fingerprints
            .contains_key(&(source_id.to_string(), external_id.to_string())))
    }

    async fn has_content_hash(&self, hash: &str) -> Result<bool, PersistenceError> {
        let g = self.inner.lock().expect("store mutex poisoned");
        Ok(g.hashes.contains_key(hash))
    }

    async fn item_count(&self) -> Result<usize, PersistenceError> {
        let g = self.inner.lock().expect("store mutex poisoned");
        Ok(g.items.len())
    }

    async fn select_batch(
        &self,
        limit: usize,
    ) -> Result<Vec<(Item, ProcessingState)>, PersistenceError> {
        let g = self.inner.lock().expect("store mutex poisoned");
        let mut eligible: Vec<(Item, ProcessingState)> = g
            .items
            .iter()
            .filter_map(|it| {
                let state = g.states.get(&it.id).copied()?;
                state.eligible().then(|| (it.clone(), state))
            })
            .collect();
        eligible.sort_by_key(|(it, _)| it.collected_at);
        eligible.truncate(limit);
        Ok(eligible)
    }

    async fn set_state(
        &self,
        item_id: u64,
        state: ProcessingState,
    ) -> Result<(), PersistenceError> {
        let mut g = self.inner.lock().expect("store mutex poisoned");
        g.states.insert(item_id, state);
        Ok(())
    }

    async fn state_of(&self, item_id: u64) -> Result<Option<ProcessingState>, PersistenceError> {
        let g = self.inner.lock().expect("store mutex poisoned");
        Ok(g.states.get(&item_id).copied())
    }

    async fn commit_result(&self, result: AnalysisResult) -> Result<(), PersistenceError> {
        let mut g = self.inner.lock().expect("store mutex poisoned");
        g.results
            .insert((result.item_id, result.agent_kind), result);
        Ok(())
    }

    async fn current_result(
        &self,
        item_id: u64,
        kind: AgentKind,
    ) -> Result<Option<AnalysisResult>, PersistenceError> {
        let g = self.inner.lock().expect("store mutex poisoned");
        Ok(g.results.get(&(item_id, kind)).cloned())
    }

    async fn insert_alert(&self, alert: NewAlert) -> Result<Alert, PersistenceError> {
        let mut g = self.inner.lock().expect("store mutex poisoned");
        g.next_alert_id += 1;
        let stored = Alert {
            id: g.next_alert_id,
            title: alert.title,
            message: alert.message,
            category: alert.category,
            priority: alert.priority,
            priority_score: alert.priority_score,
            item_ids: alert.item_ids,
            created_at: Utc::now(),
        };
        g.alerts.push(stored.clone());
        Ok(stored)
    }

    async fn alerts(&self) -> Result<Vec<Alert>, PersistenceError> {
        let g = self.inner.lock().expect("store mutex poisoned");
        Ok(g.alerts.clone())
    }

    async fn record_collection_success(
        &self,
        source_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let mut g = self.inner.lock().expect("store mutex poisoned");
        let h = g
            .health
            .entry(source_id.to_string())
            .or_insert_with(|| SourceHealth::new(source_id));
        h.last_collected_at = Some(at);
        h.collection_count += 1;
        h.consecutive_error_count = 0;
        Ok(())
    }

    async fn record_collection_failure(&self, source_id: &str) -> Result<(), PersistenceError> {
        let mut g = self.inner.lock().expect("store mutex poisoned");
        let h = g
            .health
            .entry(source_id.to_string())
            .or_insert_with(|| SourceHealth::new(source_id));
        h.consecutive_error_count += 1;
        h.total_error_count += 1;
        Ok(())
    }

    async fn source_health(&self) -> Result<Vec<SourceHealth>, PersistenceError> {
        let g = self.inner.lock().expect("store mutex poisoned");
        let mut out: Vec<SourceHealth> = g.health.values().cloned().collect();
        out.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;

    fn new_item(source: &str, ext: &str, hash: &str) -> NewItem {
        NewItem {
            source_id: source.to_string(),
            external_id: ext.to_string(),
            category: Category::Ai,
            published_at: None,
            collected_at: Utc::now(),
            title: "t".into(),
            body: "b".into(),
            content_hash: hash.to_string(),
        }
    }

    #[tokio::test]
    async fn unique_constraints_reject_duplicates() {
        let store = MemoryStore::new();
        let first = store.insert_item(new_item("rss:a", "u1", "h1")).await.unwrap();
        assert!(matches!(first, ItemInsert::Inserted(_)));

        let same_ext = store.insert_item(new_item("rss:a", "u1", "h2")).await.unwrap();
        assert!(matches!(same_ext, ItemInsert::DuplicateExternalId));

        let same_hash = store.insert_item(new_item("rss:b", "u2", "h1")).await.unwrap();
        assert!(matches!(same_hash, ItemInsert::DuplicateContent));

        assert_eq!(store.item_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn batch_selection_is_oldest_first_and_eligible_only() {
        let store = MemoryStore::new();
        let a = match store.insert_item(new_item("s", "a", "ha")).await.unwrap() {
            ItemInsert::Inserted(it) => it,
            _ => unreachable!(),
        };
        let b = match store.insert_item(new_item("s", "b", "hb")).await.unwrap() {
            ItemInsert::Inserted(it) => it,
            _ => unreachable!(),
        };
        store
            .set_state(a.id, ProcessingState::FullyProcessed)
            .await
            .unwrap();

        let batch = store.select_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].0.id, b.id);
    }

    #[tokio::test]
    async fn commit_supersedes_prior_result() {
        let store = MemoryStore::new();
        let mk = |success: bool| AnalysisResult {
            item_id: 1,
            agent_kind: AgentKind::Summarize,
            success,
            payload: serde_json::json!({}),
            processing_time_ms: 1,
            token_usage: None,
            cost_estimate: None,
            created_at: Utc::now(),
            used_fallback: false,
        };
        store.commit_result(mk(false)).await.unwrap();
        store.commit_result(mk(true)).await.unwrap();
        let current = store
            .current_result(1, AgentKind::Summarize)
            .await
            .unwrap()
            .unwrap();
        assert!(current.success);
    }

    #[tokio::test]
    async fn health_counters_track_outcomes() {
        let store = MemoryStore::new();
        store.record_collection_failure("feed:x").await.unwrap();
        store.record_collection_failure("feed:x").await.unwrap();
        store
            .record_collection_success("feed:x", Utc::now())
            .await
            .unwrap();

        let health = store.source_health().await.unwrap();
        assert_eq!(health.len(), 1);
        assert_eq!(health[0].consecutive_error_count, 0);
        assert_eq!(health[0].total_error_count, 2);
        assert_eq!(health[0].collection_count, 1);
    }
}
