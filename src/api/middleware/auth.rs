use crate::config::AppConfig;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use std::{
    future::{ready, Future, Ready},
    pin::Pin,
    rc::Rc,
};
use tracing::warn;

/// Requires one of `auth.api_keys` on every route but `/health`, either as a
/// bearer token or, for `EventSource` clients that cannot set headers, as the
/// `api_key` query parameter. An empty key list disables the check.
pub struct ApiKeyAuth;

impl<S, B> Transform<S, ServiceRequest> for ApiKeyAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = ApiKeyAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ApiKeyAuthMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct ApiKeyAuthMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for ApiKeyAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let srv = self.service.clone();

        if req.method() == actix_web::http::Method::OPTIONS || req.path() == "/health" {
            return Box::pin(async move { srv.call(req).await });
        }

        let config = match req.app_data::<actix_web::web::Data<AppConfig>>() {
            Some(c) => c,
            None => {
                warn!("AppConfig missing in app_data");
                return Box::pin(async move {
                    Err(actix_web::error::ErrorInternalServerError("Configuration error"))
                });
            }
        };

        if !config.auth.enabled() {
            return Box::pin(async move { srv.call(req).await });
        }

        let bearer = req
            .headers()
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string);

        let valid = match bearer {
            Some(token) => config.auth.accepts(&token),
            None => qstring::QString::from(req.query_string())
                .get("api_key")
                .map(|token| config.auth.accepts(token))
                .unwrap_or(false),
        };

        if !valid {
            warn!("Rejected unauthenticated request to {}", req.path());
            return Box::pin(async move {
                Err(actix_web::error::ErrorUnauthorized("Invalid or missing API key"))
            });
        }

        Box::pin(async move { srv.call(req).await })
    }
}
