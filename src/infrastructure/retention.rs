//! Message retention sweeper.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::domain::Store;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Purge messages older than `retention_days` every hour.
///
/// Channel cursors are left alone, so sequence numbers keep increasing.
pub fn spawn_retention_sweeper(store: Arc<dyn Store>, retention_days: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
            match store.purge_messages_before(cutoff).await {
                Ok(0) => tracing::debug!(%cutoff, "Retention sweep found nothing to purge"),
                Ok(removed) => tracing::info!(removed, %cutoff, "Purged expired messages"),
                Err(e) => tracing::error!(error = %e, "Retention sweep failed"),
            }
        }
    })
}
