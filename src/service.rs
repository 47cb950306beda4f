// src/service.rs
// Process-scoped service object: owns the store handle, agent registry
// (with circuit state), ledger, dedup gate, orchestrator, and background
// jobs. Built once at startup and passed by reference; no ambient globals.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::agents::registry::AgentRegistry;
use crate::collect::{run_collection, CollectionReport, SourceAdapter};
use crate::config::PipelineConfig;
use crate::dedup::DedupGate;
use crate::domain::SourceKind;
use crate::ledger::PerformanceLedger;
use crate::pipeline::{Orchestrator, ProcessingReport};
use crate::scheduler::{spawn_job, JobKind, SingleFlight};
use crate::store::Store;

pub struct Service {
    pub config: PipelineConfig,
    pub store: Arc<dyn Store>,
    pub registry: Arc<AgentRegistry>,
    pub ledger: Arc<PerformanceLedger>,
    pub gate: Arc<DedupGate>,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    orchestrator: Orchestrator,
    pub collection_flight: Arc<SingleFlight>,
    pub processing_flight: Arc<SingleFlight>,
    jobs: Mutex<Vec<JoinHandle<()>>>,
}

impl Service {
    /// Wire the full pipeline from config. The registry is built from the
    /// configured credentials; tests can inject their own via `with_parts`.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn Store>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
    ) -> Arc<Self> {
        let registry = Arc::new(AgentRegistry::from_config(&config));
        Self::with_parts(config, store, adapters, registry)
    }

    /// Wiring entry point with an explicit registry (fake backends in tests).
    pub fn with_parts(
        config: PipelineConfig,
        store: Arc<dyn Store>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        registry: Arc<AgentRegistry>,
    ) -> Arc<Self> {
        let ledger = Arc::new(PerformanceLedger::new());
        let gate = Arc::new(DedupGate::new(
            store.clone(),
            config.dedup.minimum_published_at,
        ));
        let orchestrator = Orchestrator::new(
            store.clone(),
            registry.clone(),
            ledger.clone(),
            config.batch.clone(),
            config.trends.clone(),
        );
        Arc::new(Self {
            config,
            store,
            registry,
            ledger,
            gate,
            adapters,
            orchestrator,
            collection_flight: Arc::new(SingleFlight::new(JobKind::Collection)),
            processing_flight: Arc::new(SingleFlight::new(JobKind::Processing)),
            jobs: Mutex::new(Vec::new()),
        })
    }

    /// One collection pass over every adapter (optionally one source kind).
    /// Adapter failures are absorbed into the per-source health records.
    pub async fn collect_once(&self, filter: Option<SourceKind>) -> CollectionReport {
        let mut total = CollectionReport::default();
        for adapter in &self.adapters {
            if let Some(kind) = filter {
                if adapter.kind() != kind {
                    continue;
                }
            }
            let report = run_collection(adapter.as_ref(), &self.gate, self.store.as_ref()).await;
            total.new_items += report.new_items;
            total.duplicates += report.duplicates;
            total.too_old += report.too_old;
            total.invalid += report.invalid;
        }
        total
    }

    /// One processing cycle over the stored backlog.
    pub async fn process_once(&self) -> ProcessingReport {
        self.orchestrator.run_cycle().await
    }

    /// Manual collection trigger; shares the single-flight lock with the
    /// scheduled job. `None` means the trigger was skipped.
    pub async fn trigger_collection(
        self: &Arc<Self>,
        filter: Option<SourceKind>,
    ) -> Option<CollectionReport> {
        let this = self.clone();
        self.collection_flight
            .run(move || async move { this.collect_once(filter).await })
            .await
    }

    /// Manual processing trigger through the same single-flight lock.
    pub async fn trigger_processing(self: &Arc<Self>) -> Option<ProcessingReport> {
        let this = self.clone();
        self.processing_flight
            .run(move || async move { this.process_once().await })
            .await
    }

    /// Spawn the two background jobs on their configured intervals.
    pub fn start_jobs(self: &Arc<Self>) {
        let mut jobs = self.jobs.lock().expect("jobs mutex poisoned");

        let weak = Arc::downgrade(self);
        jobs.push(spawn_job(
            self.collection_flight.clone(),
            Duration::from_secs(self.config.schedule.collection_interval_secs),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(service) = weak.upgrade() {
                        let report = service.collect_once(None).await;
                        tracing::debug!(new_items = report.new_items, "scheduled collection done");
                    }
                }
            },
        ));

        let weak = Arc::downgrade(self);
        jobs.push(spawn_job(
            self.processing_flight.clone(),
            Duration::from_secs(self.config.schedule.processing_interval_secs),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(service) = weak.upgrade() {
                        let report = service.process_once().await;
                        tracing::debug!(
                            fully = report.fully_processed,
                            "scheduled processing done"
                        );
                    }
                }
            },
        ));

        tracing::info!(
            collection_secs = self.config.schedule.collection_interval_secs,
            processing_secs = self.config.schedule.processing_interval_secs,
            "background jobs started"
        );
    }

    /// Abort background jobs. Explicit teardown pair to `start_jobs`.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock().expect("jobs mutex poisoned");
        for job in jobs.drain(..) {
            job.abort();
        }
        tracing::info!("background jobs stopped");
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.shutdown();
    }
}
