// src/dedup.rs
// Deduplication gate: the only writer of Items. Filters candidates against
// prior-seen fingerprints and the minimum-date policy, then persists
// transactionally. Safe to re-run over the same adapter output.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use metrics::counter;
use sha2::{Digest, Sha256};

use crate::domain::{Category, Item, RawItem};
use crate::error::PersistenceError;
use crate::store::{ItemInsert, NewItem, Store};

/// Normalize text for fingerprinting: decode HTML entities, strip tags,
/// collapse whitespace, case-fold.
pub fn normalize_content(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();

    out.trim().to_lowercase()
}

/// SHA-256 over normalized title + body.
pub fn content_hash(title: &str, body: &str) -> String {
    let normalized = format!("{}\n{}", normalize_content(title), normalize_content(body));
    let digest = Sha256::digest(normalized.as_bytes());
    format!("{digest:x}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    DuplicateExternalId,
    DuplicateContent,
    TooOld,
}

#[derive(Debug, Clone)]
pub enum Admission {
    Accepted(Item),
    Rejected(RejectReason),
}

/// In-memory fingerprints are a pre-filter only; the store's unique
/// constraints remain the source of truth (a parallel writer racing us is
/// still caught by the insert).
#[derive(Default)]
struct SeenCache {
    fingerprints: HashSet<(String, String)>,
    hashes: HashSet<String>,
}

pub struct DedupGate {
    store: std::sync::Arc<dyn Store>,
    minimum_published_at: Option<DateTime<Utc>>,
    seen: Mutex<SeenCache>,
}

impl DedupGate {
    pub fn new(
        store: std::sync::Arc<dyn Store>,
        minimum_published_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            store,
            minimum_published_at,
            seen: Mutex::new(SeenCache::default()),
        }
    }

    /// Admit one candidate. Accepted items are persisted before returning;
    /// rejections carry the reason for the collection report.
    pub async fn admit(
        &self,
        source_id: &str,
        raw: &RawItem,
        collected_at: DateTime<Utc>,
    ) -> Result<Admission, PersistenceError> {
        // 1) Minimum-date policy: only applies when published_at is known.
        if let (Some(min), Some(published)) = (self.minimum_published_at, raw.published_at) {
            if published < min {
                counter!("dedup_rejected_total", "reason" => "too_old").increment(1);
                return Ok(Admission::Rejected(RejectReason::TooOld));
            }
        }

        let hash = content_hash(&raw.title, &raw.body);

        // 2) Pre-filter against the in-memory cache.
        {
            let seen = self.seen.lock().expect("dedup cache mutex poisoned");
            if seen
                .fingerprints
                .contains(&(source_id.to_string(), raw.external_id.clone()))
            {
                counter!("dedup_rejected_total", "reason" => "external_id").increment(1);
                return Ok(Admission::Rejected(RejectReason::DuplicateExternalId));
            }
            if seen.hashes.contains(&hash) {
                counter!("dedup_rejected_total", "reason" => "content").increment(1);
                return Ok(Admission::Rejected(RejectReason::DuplicateContent));
            }
        }

        // 3) Transactional insert; the store's unique constraints decide.
        let insert = self
            .store
            .insert_item(NewItem {
                source_id: source_id.to_string(),
                external_id: raw.external_id.clone(),
                category: raw.category,
                published_at: raw.published_at,
                collected_at,
                title: raw.title.clone(),
                body: raw.body.clone(),
                content_hash: hash.clone(),
            })
            .await?;

        let admission = match insert {
            ItemInsert::Inserted(item) => {
                counter!("dedup_admitted_total").increment(1);
                Admission::Accepted(item)
            }
            ItemInsert::DuplicateExternalId => {
                counter!("dedup_rejected_total", "reason" => "external_id").increment(1);
                Admission::Rejected(RejectReason::DuplicateExternalId)
            }
            ItemInsert::DuplicateContent => {
                counter!("dedup_rejected_total", "reason" => "content").increment(1);
                Admission::Rejected(RejectReason::DuplicateContent)
            }
        };

        // 4) Remember the fingerprint either way; it exists in the store now.
        {
            let mut seen = self.seen.lock().expect("dedup cache mutex poisoned");
            seen.fingerprints
                .insert((source_id.to_string(), raw.external_id.clone()));
            seen.hashes.insert(hash);
        }

        Ok(admission)
    }
}

/// Convenience for tests and fixtures.
pub fn raw_item(external_id: &str, title: &str, body: &str, category: Category) -> RawItem {
    RawItem {
        external_id: external_id.to_string(),
        title: title.to_string(),
        body: body.to_string(),
        published_at: None,
        category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;
    use std::sync::Arc;

    #[test]
    fn normalization_collapses_whitespace_and_case() {
        let a = normalize_content("  Fusion   <b>Breakthrough</b>&nbsp;Announced ");
        assert_eq!(a, "fusion breakthrough announced");
    }

    #[test]
    fn hash_ignores_markup_and_spacing() {
        let h1 = content_hash("Quantum Leap", "Lab results   confirmed today.");
        let h2 = content_hash("quantum   leap", "<p>Lab results confirmed today.</p>");
        assert_eq!(h1, h2);

        let h3 = content_hash("Quantum Leap", "Different body entirely.");
        assert_ne!(h1, h3);
    }

    #[tokio::test]
    async fn admit_then_reject_same_external_id() {
        let store = Arc::new(MemoryStore::new());
        let gate = DedupGate::new(store, None);
        let raw = raw_item("https://x/1", "Title", "Body text", Category::Science);

        let first = gate.admit("feed:x", &raw, Utc::now()).await.unwrap();
        assert!(matches!(first, Admission::Accepted(_)));

        let second = gate.admit("feed:x", &raw, Utc::now()).await.unwrap();
        assert!(matches!(
            second,
            Admission::Rejected(RejectReason::DuplicateExternalId)
        ));
    }

    #[tokio::test]
    async fn same_content_different_id_is_duplicate_content() {
        let store = Arc::new(MemoryStore::new());
        let gate = DedupGate::new(store, None);

        let a = raw_item("https://x/1", "Same Story", "Shared body.", Category::Ai);
        let b = raw_item("https://y/2", "Same  STORY", "Shared body.", Category::Ai);

        assert!(matches!(
            gate.admit("feed:x", &a, Utc::now()).await.unwrap(),
            Admission::Accepted(_)
        ));
        assert!(matches!(
            gate.admit("feed:y", &b, Utc::now()).await.unwrap(),
            Admission::Rejected(RejectReason::DuplicateContent)
        ));
    }

    #[tokio::test]
    async fn old_items_rejected_only_when_date_known() {
        let store = Arc::new(MemoryStore::new());
        let min = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let gate = DedupGate::new(store, Some(min));

        let mut old = raw_item("a", "Old", "Body", Category::International);
        old.published_at = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        assert!(matches!(
            gate.admit("feed:z", &old, Utc::now()).await.unwrap(),
            Admission::Rejected(RejectReason::TooOld)
        ));

        // Unknown date passes the policy.
        let undated = raw_item("b", "Undated", "Body", Category::International);
        assert!(matches!(
            gate.admit("feed:z", &undated, Utc::now()).await.unwrap(),
            Admission::Accepted(_)
        ));
    }
}
