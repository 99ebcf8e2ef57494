//! Rate limiting middleware.

use actix_web::{
    Error, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{self, HeaderName, HeaderValue},
};
use bulwark_core::domain::EventContext;
use bulwark_core::services::{ConsumeOptions, ResilientCoordinator};
use bulwark_shared::ErrorResponse;
use chrono::Utc;
use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Rate limiting middleware factory.
///
/// Consumes one unit of `module` per request, keyed by client IP. Backend
/// outages are resolved by the module's mode: deny in enforce, allow in monitor.
pub struct RateLimitMiddleware {
    limiter: Arc<ResilientCoordinator>,
    module: Arc<str>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<ResilientCoordinator>, module: &str) -> Self {
        Self {
            limiter,
            module: Arc::from(module),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
            module: self.module.clone(),
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: Rc<S>,
    limiter: Arc<ResilientCoordinator>,
    module: Arc<str>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let limiter = self.limiter.clone();
        let module = self.module.clone();

        let key = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();

        Box::pin(async move {
            let now = Utc::now();
            let context = EventContext {
                ip: Some(key.clone()),
                ..EventContext::default()
            };
            let result = limiter
                .consume_or_fail_safe(
                    &key,
                    &module,
                    ConsumeOptions::default().at(now).with_context(context),
                )
                .await;

            if !result.allowed {
                let retry_after = result.retry_after_seconds(now).unwrap_or_else(|| {
                    u64::try_from((result.reset_time - now).num_seconds().max(0)).unwrap_or(0)
                });
                tracing::warn!(module = %module, retry_after, "Rate limit exceeded");

                let error = ErrorResponse::too_many_requests(&module).with_retry_after(retry_after);
                let response = HttpResponse::TooManyRequests()
                    .insert_header((REMAINING_HEADER, "0"))
                    .insert_header((header::RETRY_AFTER, retry_after.to_string()))
                    .json(error);

                let (http_req, _payload) = req.into_parts();
                return Ok(ServiceResponse::new(http_req, response).map_into_right_body());
            }

            let mut res = service.call(req).await?;
            res.headers_mut()
                .insert(REMAINING_HEADER, HeaderValue::from(result.remaining));
            Ok(res.map_into_left_body())
        })
    }
}
