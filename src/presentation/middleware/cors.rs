//! CORS for browser clients of the HTTP API

use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::CorsSettings;

const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(3600);

/// Build the CORS layer. `*` (or no parseable origin) allows any origin.
pub fn create_cors_layer(settings: &CorsSettings) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(allowed_origins(settings))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([header::RETRY_AFTER])
        .max_age(PREFLIGHT_MAX_AGE)
}

fn allowed_origins(settings: &CorsSettings) -> AllowOrigin {
    if settings.allowed_origins.iter().any(|o| o == "*") {
        return Any.into();
    }

    let origins: Vec<HeaderValue> = settings
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(origin) => Some(origin),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        Any.into()
    } else {
        AllowOrigin::list(origins)
    }
}
