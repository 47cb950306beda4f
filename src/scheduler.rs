// src/scheduler.rs
// Interval-driven background jobs with single-flight per job kind. A trigger
// that fires while the previous run is still going is skipped and counted,
// never queued. Manual triggers share the same lock.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Collection,
    Processing,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Collection => "collection",
            JobKind::Processing => "processing",
        }
    }
}

/// One lock + skip counter per job kind.
pub struct SingleFlight {
    kind: JobKind,
    lock: tokio::sync::Mutex<()>,
    skipped: AtomicU64,
}

impl SingleFlight {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            lock: tokio::sync::Mutex::new(()),
            skipped: AtomicU64::new(0),
        }
    }

    /// Run `op` if no run of this kind is in flight; otherwise skip it.
    /// Returns `None` on skip.
    pub async fn run<F, Fut, T>(&self, op: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self.lock.try_lock() {
            Ok(_guard) => Some(op().await),
            Err(_) => {
                self.skipped.fetch_add(1, Ordering::SeqCst);
                counter!("jobs_skipped_total", "job" => self.kind.as_str()).increment(1);
                tracing::info!(
                    job = self.kind.as_str(),
                    "trigger skipped, previous run still in flight"
                );
                None
            }
        }
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }
}

/// Spawn a ticker that drives `job` through the given single-flight lock.
/// Per-tick failures are the job's business; the ticker itself never stops.
pub fn spawn_job<F, Fut>(
    flight: Arc<SingleFlight>,
    interval: Duration,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            // A skip is already counted by the single-flight lock.
            let _ = flight.run(&job).await;
        }
    })
}
