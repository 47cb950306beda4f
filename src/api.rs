// src/api.rs
// Operator surface: manual triggers, performance/circuit snapshots, source
// health, alerts. Shapes only; rendering belongs to whatever sits in front.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::circuit::CircuitStats;
use crate::domain::{AgentKind, Alert, HealthStatus, SourceHealth, SourceKind};
use crate::ledger::PerformanceSnapshot;
use crate::service::Service;

pub fn create_router(service: Arc<Service>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/collect/{kind}", post(trigger_collection))
        .route("/api/process", post(trigger_processing))
        .route("/api/performance", get(get_performance))
        .route("/api/sources/health", get(get_source_health))
        .route("/api/alerts", get(get_alerts))
        .layer(CorsLayer::very_permissive())
        .with_state(service)
}

#[derive(serde::Serialize)]
struct TriggerCollectionResp {
    /// True when the single-flight lock was held by a running cycle.
    skipped: bool,
    new_items: usize,
    duplicates: usize,
    too_old: usize,
    invalid: usize,
}

async fn trigger_collection(
    State(service): State<Arc<Service>>,
    Path(kind): Path<String>,
) -> Result<Json<TriggerCollectionResp>, StatusCode> {
    let filter = match kind.as_str() {
        "all" => None,
        "feed" => Some(SourceKind::Feed),
        "social" => Some(SourceKind::Social),
        "trends" => Some(SourceKind::Trends),
        _ => return Err(StatusCode::BAD_REQUEST),
    };

    let resp = match service.trigger_collection(filter).await {
        Some(report) => TriggerCollectionResp {
            skipped: false,
            new_items: report.new_items,
            duplicates: report.duplicates,
            too_old: report.too_old,
            invalid: report.invalid,
        },
        None => TriggerCollectionResp {
            skipped: true,
            new_items: 0,
            duplicates: 0,
            too_old: 0,
            invalid: 0,
        },
    };
    Ok(Json(resp))
}

#[derive(serde::Serialize)]
struct TriggerProcessingResp {
    skipped: bool,
    processed: usize,
    minimal: usize,
    partial: usize,
    failed: usize,
    fallback_count: usize,
    alerts_emitted: usize,
}

async fn trigger_processing(
    State(service): State<Arc<Service>>,
) -> Json<TriggerProcessingResp> {
    let resp = match service.trigger_processing().await {
        Some(report) => TriggerProcessingResp {
            skipped: false,
            processed: report.fully_processed,
            minimal: report.minimal_processed,
            partial: report.partially_processed,
            failed: report.permanently_failed,
            fallback_count: report.fallback_count,
            alerts_emitted: report.alerts_emitted,
        },
        None => TriggerProcessingResp {
            skipped: true,
            processed: 0,
            minimal: 0,
            partial: 0,
            failed: 0,
            fallback_count: 0,
            alerts_emitted: 0,
        },
    };
    Json(resp)
}

#[derive(serde::Serialize)]
struct AgentPerformanceResp {
    agent: AgentKind,
    #[serde(flatten)]
    snapshot: PerformanceSnapshot,
    circuit: CircuitStats,
}

#[derive(serde::Serialize)]
struct PerformanceResp {
    agents: Vec<AgentPerformanceResp>,
    collection_triggers_skipped: u64,
    processing_triggers_skipped: u64,
}

async fn get_performance(State(service): State<Arc<Service>>) -> Json<PerformanceResp> {
    let circuits: std::collections::HashMap<AgentKind, CircuitStats> =
        service.registry.circuit_stats().into_iter().collect();

    let agents = service
        .ledger
        .snapshot_all()
        .into_iter()
        .map(|(agent, snapshot)| AgentPerformanceResp {
            agent,
            snapshot,
            circuit: circuits[&agent],
        })
        .collect();

    Json(PerformanceResp {
        agents,
        collection_triggers_skipped: service.collection_flight.skipped(),
        processing_triggers_skipped: service.processing_flight.skipped(),
    })
}

#[derive(serde::Serialize)]
struct SourceHealthResp {
    #[serde(flatten)]
    health: SourceHealth,
    status: HealthStatus,
}

async fn get_source_health(
    State(service): State<Arc<Service>>,
) -> Result<Json<Vec<SourceHealthResp>>, StatusCode> {
    let health = service
        .store
        .source_health()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "source health read failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    let out = health
        .into_iter()
        .map(|health| SourceHealthResp {
            status: health.status(),
            health,
        })
        .collect();
    Ok(Json(out))
}

async fn get_alerts(
    State(service): State<Arc<Service>>,
) -> Result<Json<Vec<Alert>>, StatusCode> {
    service
        .store
        .alerts()
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(error = %e, "alerts read failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
