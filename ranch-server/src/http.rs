//! The HTTP transport: one route per lifecycle verb, plus the ambient
//! health/readiness probes. Grounded on the teacher's
//! `network/module.rs` router assembly and `network/handlers/health.rs`
//! probe handlers, adapted from a `WebSocket`-centric router to a plain
//! REST surface over [`ranch_core::Ranch`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use ranch_core::{AcquireOutcome, RanchError, Resource};

use crate::shutdown::{HealthState, ShutdownController};

#[derive(Clone)]
pub struct AppState {
    pub ranch: Arc<ranch_core::Ranch>,
    pub shutdown: Arc<ShutdownController>,
    pub request_ttl: chrono::Duration,
}

/// Tracks every request for [`ShutdownController::wait_for_drain`] and
/// rejects new verb calls once the server has started draining, matching
/// the teacher's `network/middleware.rs` in-flight tracking.
async fn track_in_flight(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.shutdown.health_state() == HealthState::Draining {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let _guard = state.shutdown.in_flight_guard();
    next.run(request).await
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/acquire", post(acquire_handler))
        .route("/acquire-by-state", post(acquire_by_state_handler))
        .route("/release", post(release_handler))
        .route("/update", post(update_handler))
        .route("/reset", post(reset_handler))
        .route("/metric/{resource_type}", get(metric_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track_in_flight,
        ))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn ranch_error_status(err: &RanchError) -> StatusCode {
    match err {
        RanchError::NotFound => StatusCode::NOT_FOUND,
        RanchError::OwnerMismatch(_) | RanchError::StateMismatch(_) => StatusCode::CONFLICT,
        RanchError::Conflict(_) => StatusCode::CONFLICT,
        RanchError::ConfigInvalid(_) => StatusCode::BAD_REQUEST,
        RanchError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_response(err: RanchError) -> (StatusCode, Json<serde_json::Value>) {
    let status = ranch_error_status(&err);
    (
        status,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}

#[derive(Debug, Deserialize)]
pub struct AcquireRequest {
    pub resource_type: String,
    pub from_state: String,
    pub to_state: String,
    pub owner: String,
    #[serde(with = "humantime_duration")]
    pub lease_duration: Duration,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AcquireResponse {
    Leased { resource: Resource },
    Queued,
}

async fn acquire_handler(
    State(state): State<AppState>,
    Json(req): Json<AcquireRequest>,
) -> Result<Json<AcquireResponse>, (StatusCode, Json<serde_json::Value>)> {
    let outcome = state
        .ranch
        .acquire(
            &req.resource_type,
            &req.from_state,
            &req.to_state,
            &req.owner,
            req.lease_duration,
            req.request_id.as_deref(),
            state.request_ttl,
        )
        .map_err(error_response)?;

    Ok(Json(match outcome {
        AcquireOutcome::Leased(resource) => AcquireResponse::Leased { resource },
        AcquireOutcome::Queued => AcquireResponse::Queued,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AcquireByStateRequest {
    pub state: String,
    pub new_state: String,
    pub owner: String,
    pub names: Vec<String>,
}

async fn acquire_by_state_handler(
    State(state): State<AppState>,
    Json(req): Json<AcquireByStateRequest>,
) -> Result<Json<Vec<Resource>>, (StatusCode, Json<serde_json::Value>)> {
    let resources = state
        .ranch
        .acquire_by_state(&req.state, &req.new_state, &req.owner, &req.names)
        .map_err(error_response)?;
    Ok(Json(resources))
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub name: String,
    pub owner: String,
    pub dest_state: String,
}

async fn release_handler(
    State(state): State<AppState>,
    Json(req): Json<ReleaseRequest>,
) -> Result<Json<Resource>, (StatusCode, Json<serde_json::Value>)> {
    let resource = state
        .ranch
        .release(&req.name, &req.owner, &req.dest_state)
        .map_err(error_response)?;
    Ok(Json(resource))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub name: String,
    pub owner: String,
    pub state: String,
    #[serde(default)]
    pub user_data: BTreeMap<String, String>,
}

async fn update_handler(
    State(state): State<AppState>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<Resource>, (StatusCode, Json<serde_json::Value>)> {
    let resource = state
        .ranch
        .update(&req.name, &req.owner, &req.state, req.user_data)
        .map_err(error_response)?;
    Ok(Json(resource))
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub resource_type: String,
    pub from_state: String,
    pub expire_before: chrono::DateTime<chrono::Utc>,
    pub dest_state: String,
}

async fn reset_handler(
    State(state): State<AppState>,
    Json(req): Json<ResetRequest>,
) -> Result<Json<Vec<Resource>>, (StatusCode, Json<serde_json::Value>)> {
    let resources = state
        .ranch
        .reset(
            &req.resource_type,
            &req.from_state,
            req.expire_before,
            &req.dest_state,
        )
        .map_err(error_response)?;
    Ok(Json(resources))
}

async fn metric_handler(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
) -> Json<ranch_core::PoolSnapshot> {
    Json(state.ranch.metric_snapshot(&resource_type))
}

/// Kubernetes liveness probe -- always 200 while the process is responsive.
async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe -- 200 only in [`HealthState::Ready`].
async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Detailed health JSON for operators, distinct from the Kubernetes probes:
/// always 200, with `state` carrying whatever the probes would report.
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "state": format!("{:?}", state.shutdown.health_state()),
        "in_flight": state.shutdown.in_flight_count(),
    }))
}

/// Serializes `Duration` as a human-readable string (`"30s"`) in request bodies.
mod humantime_duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
