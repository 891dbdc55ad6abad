//! Health Check Handlers
//!
//! Liveness and readiness probes.
//!
//! # Endpoints
//! - `GET /health` - Basic health check
//! - `GET /health/live` - Liveness probe (is the process running?)
//! - `GET /health/ready` - Readiness probe (can the store serve requests?)

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::time::Instant;

use crate::startup::AppState;

/// Server start time for uptime calculation
static SERVER_START: Lazy<Instant> = Lazy::new(Instant::now);
static SERVER_START_TIME: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);

/// Initialize the server start time (call during startup)
pub fn init_server_start() {
    Lazy::force(&SERVER_START);
    Lazy::force(&SERVER_START_TIME);
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub store: ServiceHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<ServiceHealth>,
    pub stream: StreamHealth,
}

/// Health status for individual services
#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ServiceHealth {
    fn from_probe<E: std::fmt::Display>(
        result: Result<(), E>,
        started: Instant,
        degraded_after_ms: u64,
        what: &str,
    ) -> Self {
        match result {
            Ok(()) => {
                let latency = started.elapsed().as_millis() as u64;
                Self {
                    status: if latency < degraded_after_ms {
                        HealthStatus::Healthy
                    } else {
                        HealthStatus::Degraded
                    },
                    latency_ms: Some(latency),
                    message: None,
                }
            }
            Err(e) => Self {
                status: HealthStatus::Unhealthy,
                latency_ms: None,
                message: Some(format!("{} unavailable: {}", what, e)),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StreamHealth {
    pub active_connections: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "alive" })
}

/// Returns 503 when the store is unreachable
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let store = ServiceHealth::from_probe(state.store.ping().await, started, 100, "Store");

    let redis = match &state.redis {
        Some(conn) => {
            let started = Instant::now();
            let mut conn = conn.clone();
            let result = redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .map(|_| ());
            Some(ServiceHealth::from_probe(result, started, 50, "Redis"))
        }
        None => None,
    };

    let status = determine_overall_status(&store, redis.as_ref());
    let response = ReadinessResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: SERVER_START.elapsed().as_secs(),
        started_at: SERVER_START_TIME.to_rfc3339(),
        checks: HealthChecks {
            store,
            redis,
            stream: StreamHealth {
                active_connections: state.hub.connection_count(),
            },
        },
    };

    let status_code = match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

/// The store is critical; Redis only backs rate limiting, which fails open.
fn determine_overall_status(store: &ServiceHealth, redis: Option<&ServiceHealth>) -> HealthStatus {
    if store.status == HealthStatus::Unhealthy {
        return HealthStatus::Unhealthy;
    }
    let redis_ok = redis.is_none_or(|r| r.status == HealthStatus::Healthy);
    if store.status == HealthStatus::Degraded || !redis_ok {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}
