//! # Request Observation Middleware
//!
//! One middleware covering both observability concerns:
//! - a structured log line per request with method, path, status, and
//!   latency
//! - the counters behind `/metrics` (total requests, per-endpoint
//!   durations, error counts)
//!
//! Probe endpoints (`/health`, `/metrics`) are still counted but logged
//! at debug so they do not drown out transcription traffic.

use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

pub struct RequestObserver;

impl<S, B> Transform<S, ServiceRequest> for RequestObserver
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestObserverService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestObserverService { service }))
    }
}

pub struct RequestObserverService<S> {
    service: S,
}

fn is_probe(path: &str) -> bool {
    path == "/health" || path == "/metrics"
}

impl<S, B> Service<ServiceRequest> for RequestObserverService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let endpoint = format!("{} {}", method, path);

        if let Some(app_state) = req.app_data::<web::Data<AppState>>() {
            app_state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            let is_error = match &result {
                Ok(response) => {
                    response.status().is_client_error() || response.status().is_server_error()
                }
                Err(_) => true,
            };

            match &result {
                Ok(response) => {
                    if is_probe(&path) && !is_error {
                        tracing::debug!(%method, %path, status = %response.status(), duration_ms, "request completed");
                    } else {
                        tracing::info!(%method, %path, status = %response.status(), duration_ms, "request completed");
                    }

                    if let Some(app_state) = response.request().app_data::<web::Data<AppState>>() {
                        app_state.record_endpoint_request(&endpoint, duration_ms, is_error);
                        if is_error {
                            app_state.increment_error_count();
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(%method, %path, duration_ms, error = %e, "request failed");
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_paths() {
        assert!(is_probe("/health"));
        assert!(is_probe("/metrics"));
        assert!(!is_probe("/transcribe"));
    }
}
