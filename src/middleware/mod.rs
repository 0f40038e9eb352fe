//! Ambient request middleware: request ids, structured timing logs, and
//! Prometheus metrics. Authentication, tenant scoping, and rate limiting are
//! external-collaborator concerns per the system scope (§1) and are not
//! reimplemented here; CORS is handled by `tower_http::cors::CorsLayer` in
//! `main.rs` rather than a hand-rolled middleware.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Stamps every request with an `x-request-id` header and extension.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Result<Response, StatusCode> {
    let request_id = Uuid::new_v4();

    if let Ok(header_value) = request_id.to_string().parse() {
        request.headers_mut().insert("x-request-id", header_value);
    }
    request.extensions_mut().insert(request_id);

    let response = next.run(request).await;
    Ok(response)
}

/// Logs method/path/status/duration for every request at `info`, `warn` on
/// server errors.
pub async fn timing_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        warn!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = duration.as_millis(),
            "request completed with error"
        );
    } else {
        info!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = duration.as_millis(),
            "request completed"
        );
    }

    Ok(response)
}

/// Records per-route request counts and latency histograms against the
/// global `metrics` recorder installed in `main.rs`.
pub async fn metrics_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!("http_requests_total", "method" => method.clone(), "path" => path.clone(), "status" => status)
        .increment(1);
    metrics::histogram!("http_request_duration_seconds", "method" => method, "path" => path)
        .record(start.elapsed().as_secs_f64());

    Ok(response)
}
