//! HTTP middleware for greencheck
//!
//! This module provides middleware for:
//! - Request/response logging and request duration metrics
//! - OpenTelemetry tracing

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::server::router::AppState;

/// Logging middleware function
///
/// Logs method, path, status and response time, and records the request
/// duration against the matched route.
pub async fn logging_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status();

    state
        .checker
        .metrics()
        .record_request_duration(&route, status.as_u16(), elapsed.as_secs_f64());

    if status.is_server_error() {
        tracing::warn!(
            method = %method,
            path = %uri.path(),
            status = %status.as_u16(),
            duration_ms = %elapsed.as_millis(),
            "Request failed"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %uri.path(),
            status = %status.as_u16(),
            duration_ms = %elapsed.as_millis(),
            "Request completed"
        );
    }

    response
}

/// Tracing middleware function
///
/// Creates one span per request covering the whole handler, including
/// the time spent waiting on a shared computation.
pub async fn tracing_middleware(request: Request, next: Next) -> Response {
    use tracing::Instrument;

    let span = tracing::info_span!(
        "http_request",
        http.method = %request.method(),
        http.url = %request.uri(),
        http.status_code = tracing::field::Empty,
    );

    async move {
        let response = next.run(request).await;
        tracing::Span::current().record("http.status_code", response.status().as_u16());
        response
    }
    .instrument(span)
    .await
}
