//! Route Configuration
//!
//! Configures all HTTP routes for the API.

use axum::{
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};

use super::handlers;
use crate::infrastructure::metrics;
use crate::presentation::middleware::{
    auth_middleware, create_trace_layer, metrics_middleware, rate_limit_middleware,
};
use crate::presentation::websocket::stream_handler;
use crate::startup::AppState;

/// Create the main router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(api_routes(state.clone()))
        // Authenticates in-band with an `auth` frame
        .route("/stream", get(stream_handler))
        .route("/health", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn(metrics_middleware))
        .layer(create_trace_layer())
        .with_state(state)
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> impl IntoResponse {
    let metrics = metrics::gather_metrics();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
}

/// Bearer-authenticated, rate-limited routes
fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/servers",
            post(handlers::servers::create_server).get(handlers::servers::list_servers),
        )
        .route(
            "/servers/{server_id}/channels",
            post(handlers::channels::create_channel).get(handlers::channels::list_channels),
        )
        .route(
            "/servers/{server_id}/members",
            post(handlers::servers::join_server),
        )
        .route(
            "/servers/{server_id}/members/@me",
            delete(handlers::servers::leave_server),
        )
        .route(
            "/channels/{channel_id}/messages",
            get(handlers::messages::get_messages).post(handlers::messages::post_message),
        )
        .route(
            "/users/@me",
            get(handlers::users::get_current_user).patch(handlers::users::update_current_user),
        )
        // Layers run outside-in: authenticate, then rate limit
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
