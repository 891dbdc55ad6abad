//! Application settings and configuration structures.

use std::net::SocketAddr;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::presentation::websocket::HubConfig;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Listen address
    pub server: ServerSettings,

    /// PostgreSQL pool, or `memory://` for the in-process store
    pub database: DatabaseSettings,

    /// Optional Redis backend for rate limiting
    #[serde(default)]
    pub redis: RedisSettings,

    /// Bearer token verification
    #[serde(default)]
    pub auth: AuthSettings,

    /// `/stream` connections and fan-out
    pub hub: HubSettings,

    pub rate_limit: RateLimitSettings,

    pub messages: MessageSettings,

    pub cors: CorsSettings,

    /// Snowflake ID generator settings
    pub snowflake: SnowflakeSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Socket address to bind, e.g. `0.0.0.0:8080`
    pub listen_addr: String,
}

/// PostgreSQL database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Database connection URL; `memory://` selects the in-process store
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    pub acquire_timeout: u64,
}

pub const MEMORY_DATABASE_URL: &str = "memory://";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedisSettings {
    /// Unset means in-process rate limiting
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSettings {
    /// Shared HS256 secret
    pub jwt_secret: Option<String>,

    /// JWKS endpoint for asymmetric tokens; takes precedence over the secret
    pub jwks_url: Option<String>,

    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubSettings {
    /// Outbound frames buffered per connection before resync kicks in
    pub queue_capacity: usize,

    /// Seconds allowed between upgrade and the `auth` frame
    pub auth_timeout_secs: u64,

    /// Connections silent for this long are closed
    pub idle_timeout_secs: u64,

    pub max_conn_per_user: usize,

    /// Messages per `history` frame
    pub replay_batch: u32,

    pub reorder_hold_ms: u64,
    pub reorder_capacity: usize,

    /// Largest accepted client frame in bytes
    pub max_message_size: usize,

    /// Capacity of the in-process commit event bus
    pub bus_capacity: usize,
}

/// Token bucket quotas, per user.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    pub message_post_capacity: u32,
    pub message_post_window_secs: u64,
    pub read_capacity: u32,
    pub read_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageSettings {
    /// 0 keeps messages forever
    pub retention_days: u32,

    /// Positive membership answers are cached this long
    pub membership_cache_ttl_secs: u64,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins; `*` allows any
    pub allowed_origins: Vec<String>,
}

/// Snowflake ID generator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SnowflakeSettings {
    /// Machine/worker ID (0-1023)
    pub machine_id: u16,
}

/// Minimum required length for the HS256 secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. Built-in defaults
    /// 2. config/default.toml
    /// 3. config/{RUN_ENV}.toml
    /// 4. `APP__SECTION__KEY` environment variables
    /// 5. Flat variables such as `DATABASE_URL` and `LISTEN_ADDR` (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed, or
    /// fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        let settings: Self = Self::defaults(Config::builder(), &environment)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // APP__HUB__QUEUE_CAPACITY=512 -> hub.queue_capacity = 512
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("server.listen_addr", env("LISTEN_ADDR"))?
            .set_override_option("database.url", env("DATABASE_URL"))?
            .set_override_option("redis.url", env("REDIS_URL"))?
            .set_override_option("auth.jwt_secret", env("JWT_SECRET"))?
            .set_override_option("auth.jwks_url", env("AUTH_JWKS_URL"))?
            .set_override_option("hub.max_conn_per_user", env("MAX_CONN_PER_USER"))?
            .set_override_option("messages.retention_days", env("MESSAGE_RETENTION_DAYS"))?
            .set_override_option("snowflake.machine_id", env("SNOWFLAKE_MACHINE_ID"))?
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        environment: &str,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("environment", environment)?
            .set_default("server.listen_addr", "0.0.0.0:8080")?
            .set_default("database.url", MEMORY_DATABASE_URL)?
            .set_default("database.max_connections", 20)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout", 5)?
            .set_default("hub.queue_capacity", 256)?
            .set_default("hub.auth_timeout_secs", 5)?
            .set_default("hub.idle_timeout_secs", 45)?
            .set_default("hub.max_conn_per_user", 8)?
            .set_default("hub.replay_batch", 200)?
            .set_default("hub.reorder_hold_ms", 500)?
            .set_default("hub.reorder_capacity", 64)?
            .set_default("hub.max_message_size", 16_384_i64)?
            .set_default("hub.bus_capacity", 4096)?
            .set_default("rate_limit.message_post_capacity", 30)?
            .set_default("rate_limit.message_post_window_secs", 10)?
            .set_default("rate_limit.read_capacity", 300)?
            .set_default("rate_limit.read_window_secs", 60)?
            .set_default("messages.retention_days", 0)?
            .set_default("messages.membership_cache_ttl_secs", 60)?
            .set_default("cors.allowed_origins", vec!["http://localhost:5173"])?
            .set_default("snowflake.machine_id", 1)
    }

    /// Reject configurations the server cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;

        match (&self.auth.jwt_secret, &self.auth.jwks_url) {
            (None, None) => {
                return Err(ConfigError::Message(
                    "Either auth.jwt_secret (JWT_SECRET) or auth.jwks_url (AUTH_JWKS_URL) must be set"
                        .into(),
                ))
            }
            (Some(secret), _) if secret.len() < MIN_JWT_SECRET_LENGTH => {
                return Err(ConfigError::Message(format!(
                    "JWT secret must be at least {} characters. Current length: {}",
                    MIN_JWT_SECRET_LENGTH,
                    secret.len()
                )))
            }
            _ => {}
        }

        if self.snowflake.machine_id > 1023 {
            return Err(ConfigError::Message(format!(
                "snowflake.machine_id must be 0-1023, got {}",
                self.snowflake.machine_id
            )));
        }
        if self.hub.queue_capacity == 0 || self.hub.replay_batch == 0 {
            return Err(ConfigError::Message(
                "hub.queue_capacity and hub.replay_batch must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl ServerSettings {
    /// Get the socket address for binding.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr.parse().map_err(|_| {
            ConfigError::Message(format!("Invalid listen address: {}", self.listen_addr))
        })
    }
}

impl DatabaseSettings {
    pub fn is_memory(&self) -> bool {
        self.url == MEMORY_DATABASE_URL
    }
}

impl From<&HubSettings> for HubConfig {
    fn from(settings: &HubSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity,
            max_conn_per_user: settings.max_conn_per_user,
            replay_batch: settings.replay_batch,
            reorder_hold: Duration::from_millis(settings.reorder_hold_ms),
            reorder_capacity: settings.reorder_capacity,
        }
    }
}

impl Settings {
    /// Built-in defaults with the in-process store and an HS256 secret.
    /// Ignores files and the environment.
    pub fn in_memory(jwt_secret: &str) -> Result<Self, ConfigError> {
        let settings: Self = Self::defaults(Config::builder(), "test")?
            .set_override("auth.jwt_secret", jwt_secret)?
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }
}
