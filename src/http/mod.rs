//! # HTTP module
//!
//! Adapted from the teacher's `svc/http/*` (itself the axum-based successor
//! to the older hyper-service `svc/telemetry::router`), split per spec §6
//! into two independently bound listeners instead of the teacher's single
//! server: one for `/metrics` (`--metrics-addr`), one for the health
//! endpoints (`--health-addr`).

pub mod layer;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;

use axum::http::StatusCode;
use axum::response::IntoResponse;

#[tracing::instrument(skip_all)]
pub async fn not_found() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}

/// Liveness probe: the process is up and able to serve HTTP.
#[tracing::instrument(skip_all)]
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(serde_json::json!({"status": "ok"})))
}

/// Readiness probe: distinct from `healthz` so a leader-election follower
/// can report healthy-but-not-ready instead of failing liveness outright.
#[tracing::instrument(skip_all)]
pub async fn readyz() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(serde_json::json!({"status": "ok"})))
}
