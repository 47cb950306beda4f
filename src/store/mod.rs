// src/store/mod.rs
// Persistence contract consumed by the pipeline. The durable engine itself is
// an external collaborator; the pipeline relies on it for upsert semantics,
// unique-constraint rejection, and transactional writes. `MemoryStore` is the
// in-process implementation used by tests and local runs.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    AgentKind, Alert, AlertPriority, AnalysisResult, Category, Item, ProcessingState, SourceHealth,
};
use crate::error::PersistenceError;

/// Candidate item before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub source_id: String,
    pub external_id: String,
    pub category: Category,
    pub published_at: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub content_hash: String,
}

/// Outcome of an insert under the store's unique constraints. Constraint
/// rejections are outcomes, not errors: the dedup gate maps them to
/// rejections.
#[derive(Debug, Clone)]
pub enum ItemInsert {
    Inserted(Item),
    DuplicateExternalId,
    DuplicateContent,
}

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub title: String,
    pub message: String,
    pub category: Category,
    pub priority: AlertPriority,
    pub priority_score: f32,
    pub item_ids: Vec<u64>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Transactional insert; enforces uniqueness on `(source_id, external_id)`
    /// and on `content_hash`.
    async fn insert_item(&self, item: NewItem) -> Result<ItemInsert, PersistenceError>;

    async fn has_fingerprint(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> Result<bool, PersistenceError>;

    async fn has_content_hash(&self, hash: &str) -> Result<bool, PersistenceError>;

    async fn item_count(&self) -> Result<usize, PersistenceError>;

    /// Items eligible for processing (pending or partially processed),
    /// oldest `collected_at` first, up to `limit`.
    async fn select_batch(
        &self,
        limit: usize,
    ) -> Result<Vec<(Item, ProcessingState)>, PersistenceError>;

    async fn set_state(
        &self,
        item_id: u64,
        state: ProcessingState,
    ) -> Result<(), PersistenceError>;

    async fn state_of(&self, item_id: u64) -> Result<Option<ProcessingState>, PersistenceError>;

    /// Commit one analysis result. At most one current result per
    /// `(item_id, agent_kind)`; a new commit supersedes the old record.
    async fn commit_result(&self, result: AnalysisResult) -> Result<(), PersistenceError>;

    async fn current_result(
        &self,
        item_id: u64,
        kind: AgentKind,
    ) -> Result<Option<AnalysisResult>, PersistenceError>;

    async fn insert_alert(&self, alert: NewAlert) -> Result<Alert, PersistenceError>;

    async fn alerts(&self) -> Result<Vec<Alert>, PersistenceError>;

    async fn record_collection_success(
        &self,
        source_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;

    async fn record_collection_failure(&self, source_id: &str) -> Result<(), PersistenceError>;

    async fn source_health(&self) -> Result<Vec<SourceHealth>, PersistenceError>;
}
