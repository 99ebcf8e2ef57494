//! HTTP handlers and route configuration.

mod health;
mod rate_limits;

use actix_web::web;

use crate::middleware::rate_limit::RateLimitMiddleware;
use crate::state::AppState;

/// Module charged for general API traffic.
const API_MODULE: &str = "api-general";

/// Configure all application routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig, state: &AppState) {
    cfg.service(
        web::scope("/api")
            .wrap(RateLimitMiddleware::new(state.limiter.clone(), API_MODULE))
            .route("/health", web::get().to(health::health_check))
            .service(
                web::scope("/rate-limits")
                    .route("/status", web::get().to(health::status))
                    .route("/check", web::get().to(rate_limits::check))
                    .route("/configs", web::get().to(rate_limits::list_configs))
                    .route(
                        "/configs/refresh",
                        web::post().to(rate_limits::refresh_configs),
                    )
                    .route("/configs/{module}", web::get().to(rate_limits::get_config))
                    .route(
                        "/configs/{module}",
                        web::put().to(rate_limits::update_config),
                    )
                    .route("/cache", web::delete().to(rate_limits::reset_cache))
                    .route("/cache/all", web::delete().to(rate_limits::clear_cache)),
            ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, http::StatusCode, test};
    use bulwark_core::services::ConsumeOptions;
    use serde_json::{Value, json};

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .configure(|cfg| configure_routes(cfg, &$state)),
            )
            .await
        };
    }

    #[actix_rt::test]
    async fn test_health_reports_both_backends() {
        let state = AppState::in_memory();
        let app = app!(state);

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["primary"]["healthy"], true);
        assert_eq!(body["fallback"]["healthy"], true);
    }

    #[actix_rt::test]
    async fn test_update_config_rejects_zero_ceiling() {
        let state = AppState::in_memory();
        let app = app!(state);

        let req = test::TestRequest::put()
            .uri("/api/rate-limits/configs/auth")
            .set_json(json!({ "maxRequests": 0 }))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn test_check_is_read_only() {
        let state = AppState::in_memory();
        let app = app!(state);

        let req = test::TestRequest::put()
            .uri("/api/rate-limits/configs/export")
            .set_json(json!({ "maxRequests": 2 }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["maxRequests"], 2);

        state
            .limiter
            .consume("user-9", "export", ConsumeOptions::default())
            .await
            .unwrap();

        for _ in 0..3 {
            let req = test::TestRequest::get()
                .uri("/api/rate-limits/check?key=user-9&module=export")
                .to_request();
            let body: Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(body["data"]["allowed"], true);
            assert_eq!(body["data"]["remaining"], 1);
        }
    }

    #[actix_rt::test]
    async fn test_unknown_module_answers_with_fallback_template() {
        let state = AppState::in_memory();
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri("/api/rate-limits/configs/not-configured")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["isFallback"], true);
        assert_eq!(body["data"]["isActive"], false);
    }

    #[actix_rt::test]
    async fn test_reset_cache_reports_removed_counters() {
        let state = AppState::in_memory();
        let app = app!(state);

        for key in ["a", "b"] {
            state
                .limiter
                .consume(key, "auth", ConsumeOptions::default())
                .await
                .unwrap();
        }

        let req = test::TestRequest::delete()
            .uri("/api/rate-limits/cache?key=a&module=auth")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["removed"], 1);

        let req = test::TestRequest::delete()
            .uri("/api/rate-limits/cache/all")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}
