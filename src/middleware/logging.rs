//! Request logging middleware.
//!
//! Logs every HTTP request with method, path, status code, latency, client
//! address, and a generated request id.

use crate::middleware::client_ip;
use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Middleware that logs HTTP requests with timing information.
///
/// 5xx responses are logged at WARN, everything else at INFO. The request id
/// is echoed back in `x-request-id`.
pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    // Skip logging for health checks to reduce noise
    if path == "/health" {
        return next.run(request).await;
    }

    let client_ip = client_ip(request.extensions());
    let request_id = Uuid::new_v4();
    let start = Instant::now();

    let span = tracing::info_span!(
        "http_request",
        %request_id,
        method = %method,
        path = %path,
        client_ip = %client_ip,
    );

    let mut response = next.run(request).instrument(span).await;

    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    if status >= 500 {
        warn!(
            %request_id,
            method = %method,
            path = %path,
            status,
            latency_ms,
            client_ip = %client_ip,
            "Request failed (5xx)"
        );
    } else {
        info!(
            %request_id,
            method = %method,
            path = %path,
            status,
            latency_ms,
            client_ip = %client_ip,
            "Request completed"
        );
    }

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER.clone(), value);
    }

    response
}
