// tests/scheduler_singleflight.rs
//
// Single-flight: a manual trigger fired while a cycle of the same kind is
// in flight is skipped and counted, never queued. Job kinds hold
// independent locks.

use std::sync::Arc;
use std::time::Duration;

use briefwire::agents::backend::{AiBackend, AiResponse};
use briefwire::agents::registry::AgentRegistry;
use briefwire::collect::{FixtureAdapter, SourceAdapter};
use briefwire::config::PipelineConfig;
use briefwire::dedup::raw_item;
use briefwire::domain::{AgentKind, Category, SourceKind};
use briefwire::error::AgentCallError;
use briefwire::retry::RetryPolicy;
use briefwire::service::Service;
use briefwire::store::memory::MemoryStore;

/// Backend that holds each call long enough to observe overlap.
struct SlowBackend;

#[async_trait::async_trait]
impl AiBackend for SlowBackend {
    async fn call(&self, _prompt: &str) -> Result<AiResponse, AgentCallError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(AiResponse {
            text: "0.9".to_string(),
            token_usage: None,
        })
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

fn slow_service() -> Arc<Service> {
    let store = Arc::new(MemoryStore::new());
    let mut config = PipelineConfig::default();
    config.batch.quality_threshold = 0.0;

    let policy = RetryPolicy {
        max_retries: 0,
        base_delay: Duration::from_millis(1),
        factor: 1.0,
        attempt_timeout: Duration::from_secs(5),
        max_jitter: Duration::from_millis(1),
    };
    let registry = AgentRegistry::new(policy, 3, Duration::from_secs(60))
        .with_backend(AgentKind::ScoreQuality, Arc::new(SlowBackend));

    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(FixtureAdapter::new(
        "feed:slow",
        SourceKind::Feed,
        vec![raw_item(
            "s1",
            "Slow story",
            "Takes a while to analyze.",
            Category::Ai,
        )],
    ))];
    Service::with_parts(config, store, adapters, Arc::new(registry))
}

#[tokio::test]
async fn manual_trigger_during_inflight_cycle_is_skipped() {
    let service = slow_service();
    service.collect_once(None).await;

    let in_flight = {
        let service = service.clone();
        tokio::spawn(async move { service.trigger_processing().await })
    };

    // Let the first cycle take the lock.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let manual = service.trigger_processing().await;
    assert!(manual.is_none(), "overlapping trigger must be skipped");
    assert_eq!(service.processing_flight.skipped(), 1);

    let first = in_flight.await.unwrap();
    assert!(first.is_some(), "the original cycle still completes");

    // Idle again: the next manual trigger runs (nothing left to select).
    let after = service.trigger_processing().await;
    assert!(after.is_some());
    assert_eq!(service.processing_flight.skipped(), 1);
}

#[tokio::test]
async fn job_kinds_do_not_share_a_lock() {
    let service = slow_service();
    service.collect_once(None).await;

    let in_flight = {
        let service = service.clone();
        tokio::spawn(async move { service.trigger_processing().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Collection is a different job kind; its trigger proceeds.
    let collected = service.trigger_collection(None).await;
    assert!(collected.is_some());
    assert_eq!(service.collection_flight.skipped(), 0);

    in_flight.await.unwrap();
}
