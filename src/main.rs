//! # RetroComm Server
//!
//! Entry point: initializes logging, loads configuration and serves the
//! HTTP API and the `/stream` WebSocket until interrupted.

use anyhow::Result;
use tracing::info;

use retrocomm_server::config::Settings;
use retrocomm_server::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    retrocomm_server::telemetry::init_tracing();

    info!("Starting RetroComm server...");

    let settings = Settings::load()?;
    info!(
        listen_addr = %settings.server.listen_addr,
        store = if settings.database.is_memory() { "memory" } else { "postgres" },
        environment = %settings.environment,
        "Configuration loaded"
    );

    let application = Application::build(settings).await?;

    info!("Server ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
