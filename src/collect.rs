// src/collect.rs
// Collection boundary: drives one adapter through validation and the dedup
// gate, and keeps the per-source health record current. Adapters are
// external collaborators; this module only consumes their output contract.

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;

use crate::dedup::{Admission, DedupGate, RejectReason};
use crate::domain::{RawItem, SourceKind};
use crate::error::{CollectionError, ValidationError};
use crate::store::Store;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// One collection pass over the source.
    async fn collect(&self) -> Result<Vec<RawItem>, CollectionError>;
    /// Stable source identifier, e.g. "feed:nature".
    fn source_id(&self) -> &str;
    fn kind(&self) -> SourceKind;
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CollectionReport {
    pub new_items: usize,
    pub duplicates: usize,
    pub too_old: usize,
    pub invalid: usize,
}

fn validate(raw: &RawItem) -> Result<(), ValidationError> {
    if raw.external_id.trim().is_empty() {
        return Err(ValidationError::MissingExternalId);
    }
    if raw.title.trim().is_empty() && raw.body.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    Ok(())
}

/// Run one adapter's collection cycle. Adapter errors are not retried here;
/// the next scheduled cycle picks the source up again.
pub async fn run_collection(
    adapter: &dyn SourceAdapter,
    gate: &DedupGate,
    store: &dyn Store,
) -> CollectionReport {
    let source_id = adapter.source_id();
    let mut report = CollectionReport::default();

    let raw_items = match adapter.collect().await {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!(source = source_id, error = %e, "collection failed");
            counter!("collect_errors_total", "source" => source_id.to_string()).increment(1);
            if let Err(pe) = store.record_collection_failure(source_id).await {
                tracing::error!(source = source_id, error = %pe, "health update failed");
            }
            return report;
        }
    };

    let collected_at = Utc::now();
    for raw in &raw_items {
        if let Err(ve) = validate(raw) {
            tracing::debug!(source = source_id, error = %ve, "invalid raw item skipped");
            report.invalid += 1;
            counter!("collect_invalid_total", "source" => source_id.to_string()).increment(1);
            continue;
        }

        match gate.admit(source_id, raw, collected_at).await {
            Ok(Admission::Accepted(_)) => report.new_items += 1,
            Ok(Admission::Rejected(RejectReason::TooOld)) => report.too_old += 1,
            Ok(Admission::Rejected(_)) => report.duplicates += 1,
            Err(pe) => {
                // Store failure for this one item; the rest continue.
                tracing::error!(source = source_id, error = %pe, "admit failed");
            }
        }
    }

    if let Err(pe) = store.record_collection_success(source_id, collected_at).await {
        tracing::error!(source = source_id, error = %pe, "health update failed");
    }

    counter!("collect_new_items_total", "source" => source_id.to_string())
        .increment(report.new_items as u64);
    tracing::info!(
        source = source_id,
        new = report.new_items,
        duplicates = report.duplicates,
        too_old = report.too_old,
        invalid = report.invalid,
        "collection cycle done"
    );
    report
}

/// Adapter fed from a fixed set of raw items. Used by tests and local runs;
/// stands in for any real feed/social/trends adapter.
pub struct FixtureAdapter {
    source_id: String,
    kind: SourceKind,
    items: Vec<RawItem>,
}

impl FixtureAdapter {
    pub fn new(source_id: impl Into<String>, kind: SourceKind, items: Vec<RawItem>) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            items,
        }
    }

    /// Parse a JSON array of raw items, e.g. from `config/fixtures/*.json`.
    pub fn from_json(
        source_id: impl Into<String>,
        kind: SourceKind,
        json: &str,
    ) -> anyhow::Result<Self> {
        let items: Vec<RawItem> = serde_json::from_str(json)?;
        Ok(Self::new(source_id, kind, items))
    }
}

#[async_trait]
impl SourceAdapter for FixtureAdapter {
    async fn collect(&self) -> Result<Vec<RawItem>, CollectionError> {
        Ok(self.items.clone())
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }
}

/// Adapter that always fails; used to exercise the health bookkeeping.
pub struct FailingAdapter {
    source_id: String,
    kind: SourceKind,
}

impl FailingAdapter {
    pub fn new(source_id: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
        }
    }
}

#[async_trait]
impl SourceAdapter for FailingAdapter {
    async fn collect(&self) -> Result<Vec<RawItem>, CollectionError> {
        Err(CollectionError::Network("connection refused".into()))
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }
}
