// tests/dedup_idempotence.rs
//
// Invariants of the deduplication gate:
// - feeding the same adapter output twice yields zero item-store growth
// - content fingerprints catch re-published items with fresh external ids
// - the minimum-date policy only applies when the publish date is known

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use briefwire::collect::{run_collection, FixtureAdapter};
use briefwire::dedup::{raw_item, DedupGate};
use briefwire::domain::{Category, RawItem, SourceKind};
use briefwire::store::memory::MemoryStore;
use briefwire::store::Store;

fn feed_items() -> Vec<RawItem> {
    vec![
        raw_item(
            "https://example.org/fusion",
            "Fusion record announced",
            "A national lab reports a sustained net-gain fusion shot.",
            Category::Science,
        ),
        raw_item(
            "https://example.org/quantum",
            "Quantum chip ships",
            "A 1000-qubit research device reaches general availability.",
            Category::Ai,
        ),
        raw_item(
            "https://example.org/treaty",
            "Trade treaty signed",
            "Two blocs sign a long-negotiated trade agreement.",
            Category::International,
        ),
    ]
}

#[tokio::test]
async fn second_full_run_admits_zero_items() {
    let store = Arc::new(MemoryStore::new());
    let gate = DedupGate::new(store.clone(), None);
    let adapter = FixtureAdapter::new("feed:wire", SourceKind::Feed, feed_items());

    let first = run_collection(&adapter, &gate, store.as_ref()).await;
    assert_eq!(first.new_items, 3);
    assert_eq!(store.item_count().await.unwrap(), 3);

    let second = run_collection(&adapter, &gate, store.as_ref()).await;
    assert_eq!(second.new_items, 0);
    assert_eq!(second.duplicates, 3);
    assert_eq!(
        store.item_count().await.unwrap(),
        3,
        "item store must not grow on the second identical run"
    );
}

#[tokio::test]
async fn fresh_gate_instance_still_rejects_persisted_duplicates() {
    // The in-memory pre-filter is empty after a restart; the store's unique
    // constraints must still hold.
    let store = Arc::new(MemoryStore::new());

    let gate = DedupGate::new(store.clone(), None);
    let adapter = FixtureAdapter::new("feed:wire", SourceKind::Feed, feed_items());
    run_collection(&adapter, &gate, store.as_ref()).await;

    let rebuilt_gate = DedupGate::new(store.clone(), None);
    let report = run_collection(&adapter, &rebuilt_gate, store.as_ref()).await;
    assert_eq!(report.new_items, 0);
    assert_eq!(report.duplicates, 3);
    assert_eq!(store.item_count().await.unwrap(), 3);
}

#[tokio::test]
async fn identical_content_under_new_external_id_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let gate = DedupGate::new(store.clone(), None);

    let original = FixtureAdapter::new(
        "feed:first",
        SourceKind::Feed,
        vec![raw_item(
            "https://first.example/post/1",
            "Breakthrough In Batteries",
            "Solid state cells reach 500 Wh/kg in production.",
            Category::Science,
        )],
    );
    run_collection(&original, &gate, store.as_ref()).await;

    // Same story republished elsewhere: different id, same normalized body.
    let mirror = FixtureAdapter::new(
        "feed:mirror",
        SourceKind::Feed,
        vec![raw_item(
            "https://mirror.example/xyz",
            "breakthrough   in BATTERIES",
            "<p>Solid state cells reach 500 Wh/kg in production.</p>",
            Category::Science,
        )],
    );
    let report = run_collection(&mirror, &gate, store.as_ref()).await;
    assert_eq!(report.new_items, 0);
    assert_eq!(report.duplicates, 1);
    assert_eq!(store.item_count().await.unwrap(), 1);
}

#[tokio::test]
async fn minimum_date_policy_rejects_known_old_items_only() {
    let store = Arc::new(MemoryStore::new());
    let min = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let gate = DedupGate::new(store.clone(), Some(min));

    let mut stale = raw_item(
        "https://example.org/old",
        "Archive piece",
        "An old story resurfacing in the feed.",
        Category::International,
    );
    stale.published_at = Some(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());

    let mut fresh = raw_item(
        "https://example.org/new",
        "Current piece",
        "Published after the cutoff.",
        Category::International,
    );
    fresh.published_at = Some(Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap());

    let undated = raw_item(
        "https://example.org/undated",
        "Undated piece",
        "No publish timestamp on the wire.",
        Category::International,
    );

    let adapter = FixtureAdapter::new(
        "feed:mixed",
        SourceKind::Feed,
        vec![stale, fresh, undated],
    );
    let report = run_collection(&adapter, &gate, store.as_ref()).await;
    assert_eq!(report.too_old, 1);
    assert_eq!(report.new_items, 2);
}
