//! Health and status endpoints.

use actix_web::{HttpResponse, web};
use serde::Serialize;

use bulwark_core::domain::{Backend, BackendHealth};
use bulwark_core::services::MetricsSnapshot;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub primary: BackendHealth,
    pub fallback: BackendHealth,
}

/// Health check endpoint - process status plus both counter backends.
///
/// Degraded (one backend down) still answers 200; only a total outage is 503.
///
/// GET /api/health
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let report = state.limiter.health_check().await;
    let status = match (report.primary.healthy, report.fallback.healthy) {
        (true, true) => "ok",
        (false, false) => "down",
        _ => "degraded",
    };

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        primary: report.primary,
        fallback: report.fallback,
    };

    if status == "down" {
        HttpResponse::ServiceUnavailable().json(response)
    } else {
        HttpResponse::Ok().json(response)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub active_backend: Backend,
    pub primary: BackendHealth,
    pub fallback: BackendHealth,
    pub metrics: MetricsSnapshot,
}

/// GET /api/rate-limits/status
pub async fn status(state: web::Data<AppState>) -> HttpResponse {
    let report = state.limiter.health_check().await;
    HttpResponse::Ok().json(StatusResponse {
        active_backend: report.active,
        primary: report.primary,
        fallback: report.fallback,
        metrics: state.metrics.snapshot(),
    })
}
