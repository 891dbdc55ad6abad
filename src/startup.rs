//! Application Startup
//!
//! Wires the Store, services, hub and background tasks together and binds
//! the HTTP listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use redis::aio::ConnectionManager;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::application::services::{Authorizer, DirectoryService, MessageRouter, ProfileService};
use crate::config::Settings;
use crate::domain::{MembershipObserver, Publisher, Store, Subscriber};
use crate::infrastructure::auth::{ClaimRules, JwksVerifier, JwtVerifier, TokenVerifier};
use crate::infrastructure::pubsub::{spawn_dispatcher, spawn_pg_relay, EventBus, RelayTargets};
use crate::infrastructure::rate_limit::{LocalRateLimiter, QuotaTable, RateLimiter, RedisRateLimiter};
use crate::infrastructure::retention::spawn_retention_sweeper;
use crate::infrastructure::store::{MemoryStore, PgStore};
use crate::infrastructure::database;
use crate::presentation::http::{handlers::health, routes};
use crate::presentation::middleware::create_cors_layer;
use crate::presentation::websocket::{spawn_sweeper, Hub, HubConfig};
use crate::shared::snowflake::SnowflakeGenerator;

/// How often expired membership entries and idle rate-limit buckets are dropped
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn Store>,
    pub authorizer: Arc<Authorizer>,
    pub router: Arc<MessageRouter>,
    pub directory: Arc<DirectoryService>,
    pub profiles: Arc<ProfileService>,
    pub hub: Arc<Hub>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    /// Present when rate limiting is shared through Redis
    pub redis: Option<ConnectionManager>,
}

/// Background tasks owned by the application; aborted on drop.
#[derive(Default)]
pub struct BackgroundTasks(Vec<JoinHandle<()>>);

impl BackgroundTasks {
    fn push(&mut self, handle: JoinHandle<()>) {
        self.0.push(handle);
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Build the shared state and start the tasks it depends on.
pub async fn build_state(settings: Settings) -> Result<(AppState, BackgroundTasks)> {
    let mut tasks = BackgroundTasks::default();
    let origin = Uuid::new_v4().to_string();
    let ids = Arc::new(SnowflakeGenerator::new(u64::from(settings.snowflake.machine_id)));

    let (store, pool): (Arc<dyn Store>, _) = if settings.database.is_memory() {
        tracing::warn!("Using the in-process store; data is not persisted");
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        (store, None)
    } else {
        let pool = database::connect(&settings.database).await?;
        let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone(), origin.clone()));
        (store, Some(pool))
    };

    let verifier = create_verifier(&settings)?;
    let authorizer = Arc::new(Authorizer::new(
        verifier,
        store.clone(),
        Duration::from_secs(settings.messages.membership_cache_ttl_secs),
    ));

    let bus = EventBus::new(settings.hub.bus_capacity);
    let publisher: Arc<dyn Publisher> = Arc::new(bus.clone());

    let hub = Arc::new(Hub::new(
        store.clone(),
        authorizer.clone(),
        HubConfig::from(&settings.hub),
    ));
    tasks.push(spawn_dispatcher(&bus, hub.clone()));
    tasks.push(spawn_sweeper(hub.clone()));

    if let Some(pool) = pool {
        let targets = RelayTargets {
            store: store.clone(),
            publisher: publisher.clone(),
            subscriber: hub.clone() as Arc<dyn Subscriber>,
            membership: authorizer.clone() as Arc<dyn MembershipObserver>,
        };
        tasks.push(spawn_pg_relay(pool, origin.clone(), targets));
    }

    if settings.messages.retention_days > 0 {
        tracing::info!(
            retention_days = settings.messages.retention_days,
            "Message retention enabled"
        );
        tasks.push(spawn_retention_sweeper(
            store.clone(),
            settings.messages.retention_days,
        ));
    }

    let quotas = QuotaTable::from(&settings.rate_limit);
    let (rate_limiter, redis): (Arc<dyn RateLimiter>, _) = match &settings.redis.url {
        Some(url) => {
            let client = redis::Client::open(url.as_str()).context("Invalid Redis URL")?;
            let conn = ConnectionManager::new(client)
                .await
                .context("Failed to connect to Redis")?;
            tracing::info!("Redis connection established");
            let limiter: Arc<dyn RateLimiter> =
                Arc::new(RedisRateLimiter::new(conn.clone(), quotas));
            (limiter, Some(conn))
        }
        None => {
            let limiter: Arc<dyn RateLimiter> = Arc::new(LocalRateLimiter::new(quotas));
            (limiter, None)
        }
    };

    tasks.push(spawn_cache_sweeper(authorizer.clone(), rate_limiter.clone()));

    let state = AppState {
        router: Arc::new(MessageRouter::new(
            store.clone(),
            authorizer.clone(),
            publisher,
            ids.clone(),
        )),
        directory: Arc::new(DirectoryService::new(
            store.clone(),
            authorizer.clone(),
            ids,
        )),
        profiles: Arc::new(ProfileService::new(store.clone())),
        settings: Arc::new(settings),
        store,
        authorizer,
        hub,
        rate_limiter,
        redis,
    };

    tracing::info!(origin = %origin, "Application state ready");
    Ok((state, tasks))
}

fn spawn_cache_sweeper(
    authorizer: Arc<Authorizer>,
    rate_limiter: Arc<dyn RateLimiter>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let entries = authorizer.evict_expired();
            let buckets = rate_limiter.evict_idle();
            if entries + buckets > 0 {
                tracing::debug!(entries, buckets, "Evicted expired cache entries");
            }
        }
    })
}

fn create_verifier(settings: &Settings) -> Result<Arc<dyn TokenVerifier>> {
    let rules = ClaimRules {
        issuer: settings.auth.issuer.clone(),
        audience: settings.auth.audience.clone(),
    };

    match (&settings.auth.jwks_url, &settings.auth.jwt_secret) {
        (Some(url), _) => {
            tracing::info!(url = %url, "Verifying tokens against JWKS");
            Ok(Arc::new(JwksVerifier::new(url.clone(), rules)?))
        }
        (None, Some(secret)) => Ok(Arc::new(JwtVerifier::new(secret, rules))),
        (None, None) => anyhow::bail!("No token verifier configured"),
    }
}

/// Router with every layer applied.
pub fn create_app(state: AppState) -> Router {
    let cors = create_cors_layer(&state.settings.cors);
    routes::create_router(state).layer(cors)
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    _tasks: BackgroundTasks,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        health::init_server_start();

        let addr = settings.server.socket_addr()?;
        let (state, tasks) = build_state(settings).await?;
        let router = create_app(state);

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            router,
            _tasks: tasks,
        })
    }

    /// Run the server until stopped
    pub async fn run_until_stopped(self) -> Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
