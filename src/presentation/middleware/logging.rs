//! Request Logging and Metrics
//!
//! `TraceLayer` for per-request spans plus a middleware that records
//! Prometheus request metrics labelled by matched route.

use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, Request},
    http::Request as HttpRequest,
    middleware::Next,
    response::Response,
};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{Level, Span};

use crate::infrastructure::metrics;

/// Span per request with method, route and a request id.
pub fn create_trace_layer() -> TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    impl Fn(&HttpRequest<Body>) -> Span + Clone,
> {
    TraceLayer::new_for_http()
        .make_span_with(|request: &HttpRequest<Body>| {
            let route = request
                .extensions()
                .get::<MatchedPath>()
                .map(|p| p.as_str().to_owned())
                .unwrap_or_else(|| request.uri().path().to_owned());
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                route = %route,
                request_id = %uuid::Uuid::new_v4(),
            )
        })
        .on_response(DefaultOnResponse::new().level(Level::DEBUG))
}

pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    // Unmatched paths share one label to keep cardinality bounded
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let start = Instant::now();
    let response = next.run(request).await;

    metrics::record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
