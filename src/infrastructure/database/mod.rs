//! PostgreSQL pool and schema
//!
//! Only used when `database.url` names a Postgres server; `memory://` skips
//! this module entirely.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

use crate::config::DatabaseSettings;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to run migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Open the pool and bring the schema up to date.
pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, DatabaseError> {
    let url = redact(&settings.url);

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout))
        .test_before_acquire(true)
        .connect(&settings.url)
        .await
        .map_err(|source| DatabaseError::Connect {
            url: url.clone(),
            source,
        })?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!(
        url = %url,
        max_connections = settings.max_connections,
        "Database ready"
    );
    Ok(pool)
}

/// Strip the password from a connection URL for logging.
fn redact(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.rsplit_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{}://{}:***@{}", scheme, user, host)
        }
        None => url.to_string(),
    }
}
