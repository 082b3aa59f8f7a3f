//! HTTP API for health checks, Prometheus metrics and instance status

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use optimizer_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::OptimizerMetrics,
    ports::InstanceStore,
    FinalResult, InstanceStatus, UnitStatus,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: OptimizerMetrics,
    pub store: Arc<dyn InstanceStore>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: OptimizerMetrics,
        store: Arc<dyn InstanceStore>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            store,
        }
    }
}

/// Status of one instance as reported to operators
#[derive(Debug, Serialize)]
pub struct InstanceView {
    pub instance_id: String,
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub devices: usize,
    pub plans: usize,
    pub sequences: usize,
    pub units: usize,
    /// Unit count per unit status
    pub unit_statuses: BTreeMap<UnitStatus, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_result: Option<FinalResult>,
}

/// 200 while operational, 503 once a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn instance_status(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
) -> Response {
    match load_view(state.store.as_ref(), &instance_id).await {
        Ok(Some(view)) => (StatusCode::OK, Json(view)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("instance {} not found", instance_id) })),
        )
            .into_response(),
        Err(e) => {
            warn!(instance_id = %instance_id, error = %e, "Instance lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn load_view(
    store: &dyn InstanceStore,
    instance_id: &str,
) -> optimizer_lib::Result<Option<InstanceView>> {
    let Some(record) = store.instance(instance_id).await? else {
        return Ok(None);
    };

    let mut unit_statuses = BTreeMap::new();
    for status in store.unit_statuses(instance_id).await?.into_values() {
        *unit_statuses.entry(status).or_insert(0) += 1;
    }

    Ok(Some(InstanceView {
        instance_id: instance_id.to_string(),
        status: record.status,
        reason: record.reason,
        devices: record.request.devices.len(),
        plans: record.request.plans.len(),
        sequences: record.sequences.len(),
        units: record.units.len(),
        unit_statuses,
        final_result: store.final_result(instance_id).await?,
    }))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/instances/:id", get(instance_status))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
