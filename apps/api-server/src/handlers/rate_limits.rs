//! Rate limit administration handlers.

use actix_web::{HttpResponse, web};

use chrono::Utc;

use bulwark_core::domain::{ConsumeResult, RateLimitConfigPatch};
use bulwark_core::services::ConsumeOptions;
use bulwark_shared::ApiResponse;
use bulwark_shared::dto::{
    CheckQuery, ConsumeResponse, RefreshConfigsResponse, ResetCacheQuery, ResetCacheResponse,
};

use crate::middleware::error::AppResult;
use crate::state::AppState;

/// GET /api/rate-limits/configs
pub async fn list_configs(state: web::Data<AppState>) -> HttpResponse {
    let configs = state.limiter.configs().get_all_configs().await;
    HttpResponse::Ok().json(ApiResponse::ok(configs))
}

/// GET /api/rate-limits/configs/{module}
///
/// Unknown modules answer with the fallback template (`isFallback: true`).
pub async fn get_config(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let config = state.limiter.configs().get_config(&path).await;
    HttpResponse::Ok().json(ApiResponse::ok(config))
}

/// PUT /api/rate-limits/configs/{module}
pub async fn update_config(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<RateLimitConfigPatch>,
) -> AppResult<HttpResponse> {
    let module = path.into_inner();
    let config = state
        .limiter
        .configs()
        .update_config(&module, &body.into_inner())
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok_with_message(
        config,
        format!("Configuration for '{module}' updated"),
    )))
}

/// POST /api/rate-limits/configs/refresh
pub async fn refresh_configs(state: web::Data<AppState>) -> HttpResponse {
    let modules = state.limiter.configs().refresh_configs().await;
    HttpResponse::Ok().json(ApiResponse::ok(RefreshConfigsResponse { modules }))
}

/// DELETE /api/rate-limits/cache?key=&module=
pub async fn reset_cache(
    state: web::Data<AppState>,
    query: web::Query<ResetCacheQuery>,
) -> AppResult<HttpResponse> {
    let query = query.into_inner();
    let removed = state
        .limiter
        .reset_cache(query.key.as_deref(), query.module.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(ResetCacheResponse { removed })))
}

/// DELETE /api/rate-limits/cache/all
pub async fn clear_cache(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let removed = state.limiter.clear_cache_completely().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(ResetCacheResponse { removed })))
}

/// GET /api/rate-limits/check?key=&module=
///
/// Read-only: reports the current decision without consuming.
pub async fn check(
    state: web::Data<AppState>,
    query: web::Query<CheckQuery>,
) -> AppResult<HttpResponse> {
    let now = Utc::now();
    let result = state
        .limiter
        .consume(&query.key, &query.module, ConsumeOptions::check().at(now))
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(to_response(&result, now))))
}

pub fn to_response(result: &ConsumeResult, now: chrono::DateTime<Utc>) -> ConsumeResponse {
    ConsumeResponse {
        allowed: result.allowed,
        remaining: result.remaining,
        reset_time: result.reset_time,
        warning: result.warning,
        blocked_until: result.blocked_until,
        retry_after_seconds: result.retry_after_seconds(now),
    }
}
