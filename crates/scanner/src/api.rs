//! HTTP API: scan trigger, cache administration, health checks and
//! Prometheus metrics

use scanner_lib::{
    health::{components, ComponentStatus, HealthRegistry},
    CacheStatus, ScanError, ScanOrchestrator, ScanReport, ScanRequest, ScanState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub orchestrator: Arc<ScanOrchestrator>,
    /// Window applied when a scan request omits one
    pub default_window_days: u32,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        orchestrator: Arc<ScanOrchestrator>,
        default_window_days: u32,
    ) -> Self {
        Self {
            health_registry,
            orchestrator,
            default_window_days,
        }
    }
}

/// Body of `POST /api/v1/scans`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanBody {
    pub tenant_id: String,
    #[serde(default)]
    pub window_days: Option<u32>,
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSummary {
    pub tenant_id: String,
    pub state: ScanState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Error response with a JSON body
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unknown_tenant(tenant_id: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("unknown tenant: {tenant_id}"))
    }
}

impl From<&ScanError> for ApiError {
    fn from(err: &ScanError) -> Self {
        let status = match err {
            ScanError::UnknownTenant(_) => StatusCode::NOT_FOUND,
            ScanError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ScanError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            ScanError::Connect { .. }
            | ScanError::RegionDiscovery { .. }
            | ScanError::NoRegions(_) => StatusCode::BAD_GATEWAY,
        };

        // Append the backend cause
        let message = match std::error::Error::source(err) {
            Some(source) => format!("{err}: {source}"),
            None => err.to_string(),
        };
        Self::new(status, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Health check response - returns 200 if operational, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Result<impl IntoResponse, ApiError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    ))
}

async fn list_tenants(State(state): State<Arc<AppState>>) -> Json<Vec<TenantSummary>> {
    let orchestrator = &state.orchestrator;
    Json(
        orchestrator
            .tenant_ids()
            .into_iter()
            .map(|tenant_id| TenantSummary {
                state: orchestrator.state(&tenant_id),
                tenant_id,
            })
            .collect(),
    )
}

async fn run_scan(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScanBody>,
) -> Result<Json<ScanReport>, ApiError> {
    let request = ScanRequest {
        tenant_id: body.tenant_id,
        window_days: body.window_days.unwrap_or(state.default_window_days),
        force_refresh: body.force_refresh,
    };

    let outcome = state.orchestrator.scan(request).await;
    state.health_registry.record_scan(&outcome).await;

    match outcome {
        Ok(report) => Ok(Json(report)),
        Err(e) => Err(ApiError::from(&e)),
    }
}

async fn cache_status(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<Json<CacheStatus>, ApiError> {
    if !state.orchestrator.has_tenant(&tenant_id) {
        return Err(ApiError::unknown_tenant(&tenant_id));
    }
    let key = ScanOrchestrator::cache_key(&tenant_id);
    Ok(Json(state.orchestrator.cache().status(&key)))
}

async fn clear_cache(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<Json<CacheStatus>, ApiError> {
    if !state.orchestrator.has_tenant(&tenant_id) {
        return Err(ApiError::unknown_tenant(&tenant_id));
    }
    let cache = state.orchestrator.cache();
    let key = ScanOrchestrator::cache_key(&tenant_id);

    if let Err(e) = cache.clear(&key) {
        warn!(tenant_id = %tenant_id, error = %e, "Failed to clear cache entry");
        state
            .health_registry
            .set_degraded(components::CACHE, e.to_string())
            .await;
        return Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
    }

    info!(tenant_id = %tenant_id, "Cache entry cleared");
    Ok(Json(cache.status(&key)))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/tenants", get(list_tenants))
        .route("/api/v1/scans", post(run_scan))
        .route(
            "/api/v1/cache/:tenant_id",
            get(cache_status).delete(clear_cache),
        )
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
