//! # Configuration Module
//!
//! This module handles application configuration loading and management.
//! Configuration can be loaded from:
//! - Environment variables (`APP__SECTION__KEY`, plus `DATABASE_URL`,
//!   `LISTEN_ADDR`, `AUTH_JWKS_URL`, `MAX_CONN_PER_USER`,
//!   `MESSAGE_RETENTION_DAYS`, `JWT_SECRET`, `REDIS_URL`)
//! - Configuration files (config/default.toml, config/{environment}.toml)
//! - .env files (via dotenvy)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use retrocomm_server::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Server will listen on {}", settings.server.listen_addr);
//! ```

mod settings;

pub use settings::*;
