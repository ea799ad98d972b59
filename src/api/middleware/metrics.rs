//! HTTP Metrics Middleware
//!
//! Records request count, duration and in-flight gauge for every request,
//! labelled by the matched route template rather than the raw path.

use axum::{
    body::Body,
    extract::MatchedPath,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::metrics::{self, Timer};

pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let timer = Timer::new();

    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    metrics::http_request_started();
    let response = next.run(request).await;
    metrics::http_request_finished();

    metrics::record_http_request(&method, &path, response.status().as_u16(), timer.elapsed_secs());

    response
}
