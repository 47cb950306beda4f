//! Briefwire binary entrypoint.
//! Boots the Axum HTTP server, wires the pipeline service, and starts the
//! background collection/processing jobs.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use briefwire::collect::{FixtureAdapter, SourceAdapter};
use briefwire::config::PipelineConfig;
use briefwire::domain::SourceKind;
use briefwire::metrics::Metrics;
use briefwire::service::Service;
use briefwire::store::memory::MemoryStore;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("briefwire=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

/// Load fixture adapters from `config/fixtures/*.json`. Real deployments
/// register their own adapters here instead; the pipeline does not care
/// which wire format sits behind the contract.
fn load_adapters() -> Vec<Arc<dyn SourceAdapter>> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    let dir = Path::new("config/fixtures");
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => {
            tracing::info!("no fixture adapters found, starting with an empty source set");
            return adapters;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let kind = if stem.starts_with("social") {
            SourceKind::Social
        } else if stem.starts_with("trends") {
            SourceKind::Trends
        } else {
            SourceKind::Feed
        };

        match std::fs::read_to_string(&path) {
            Ok(json) => match FixtureAdapter::from_json(format!("fixture:{stem}"), kind, &json) {
                Ok(adapter) => adapters.push(Arc::new(adapter)),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "bad fixture file"),
            },
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "unreadable fixture"),
        }
    }

    tracing::info!(count = adapters.len(), "fixture adapters loaded");
    adapters
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = PipelineConfig::load_default();
    let metrics = Metrics::init();

    let store = Arc::new(MemoryStore::new());
    let adapters = load_adapters();
    let service = Service::new(config, store, adapters);
    service.start_jobs();

    let router = briefwire::api::create_router(service.clone()).merge(metrics.router());

    let addr = std::env::var("BRIEFWIRE_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "briefwire listening");

    axum::serve(listener, router).await.context("server exited")?;

    service.shutdown();
    Ok(())
}
