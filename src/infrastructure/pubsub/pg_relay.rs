//! Cross-process fan-out over Postgres LISTEN/NOTIFY.
//!
//! Triggers on `messages` and `server_members` emit notifications on
//! `message_commits` and `membership_changes`. Each worker listens on both:
//! commits from other workers are loaded from the Store and published on the
//! local bus; membership changes invalidate the local authorization cache.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::{CommitEvent, MembershipObserver, Publisher, Store, Subscriber};

pub const MESSAGE_COMMITS: &str = "message_commits";
pub const MEMBERSHIP_CHANGES: &str = "membership_changes";

const MIN_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Reconnect delay; doubles per failed attempt, back to the minimum once a
/// listener is established.
#[derive(Debug)]
struct Backoff {
    next: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self { next: MIN_BACKOFF }
    }

    fn reset(&mut self) {
        self.next = MIN_BACKOFF;
    }

    fn advance(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(MAX_BACKOFF);
        delay
    }
}

#[derive(Debug, Deserialize)]
struct CommitNotification {
    channel_id: i64,
    message_id: i64,
    seq: i64,
    origin: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MembershipNotification {
    server_id: i64,
    user_id: Uuid,
}

/// Where relayed notifications go.
#[derive(Clone)]
pub struct RelayTargets {
    pub store: Arc<dyn Store>,
    pub publisher: Arc<dyn Publisher>,
    /// Told to resync after the listener reconnects
    pub subscriber: Arc<dyn Subscriber>,
    pub membership: Arc<dyn MembershipObserver>,
}

/// Run the relay until the task is aborted, reconnecting with backoff.
pub fn spawn_pg_relay(pool: PgPool, origin: String, targets: RelayTargets) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = Backoff::new();
        let mut connected_before = false;

        loop {
            let result = listen(&pool, &origin, &targets, &mut connected_before, &mut backoff).await;
            let e = match result {
                Ok(never) => match never {},
                Err(e) => e,
            };
            let delay = backoff.advance();
            tracing::error!(
                error = %e,
                retry_in_ms = delay.as_millis() as u64,
                "Commit relay disconnected"
            );
            tokio::time::sleep(delay).await;
        }
    })
}

/// Listen until the connection fails.
async fn listen(
    pool: &PgPool,
    origin: &str,
    targets: &RelayTargets,
    connected_before: &mut bool,
    backoff: &mut Backoff,
) -> Result<Infallible, sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener
        .listen_all([MESSAGE_COMMITS, MEMBERSHIP_CHANGES])
        .await?;
    backoff.reset();
    tracing::info!("Commit relay listening");

    // Anything committed while we were disconnected is unknown
    if *connected_before {
        targets.subscriber.on_overflow();
    }
    *connected_before = true;

    loop {
        let notification = listener.recv().await?;
        match notification.channel() {
            MESSAGE_COMMITS => relay_commit(notification.payload(), origin, targets).await,
            MEMBERSHIP_CHANGES => relay_membership(notification.payload(), targets),
            other => tracing::debug!(channel = other, "Ignoring notification"),
        }
    }
}

async fn relay_commit(payload: &str, origin: &str, targets: &RelayTargets) {
    let commit: CommitNotification = match serde_json::from_str(payload) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, payload, "Malformed commit notification");
            return;
        }
    };

    // Local commits were already published by the router
    if commit.origin.as_deref() == Some(origin) {
        return;
    }

    match targets.store.get_message(commit.message_id).await {
        Ok(Some(message)) => {
            if let Err(e) = targets.publisher.publish(CommitEvent::new(message)).await {
                tracing::debug!(error = %e, channel_id = commit.channel_id, "Relayed commit not published");
            }
        }
        Ok(None) => {
            tracing::debug!(
                message_id = commit.message_id,
                seq = commit.seq,
                "Relayed message no longer exists"
            );
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                channel_id = commit.channel_id,
                seq = commit.seq,
                "Failed to load relayed message"
            );
        }
    }
}

fn relay_membership(payload: &str, targets: &RelayTargets) {
    match serde_json::from_str::<MembershipNotification>(payload) {
        Ok(change) => targets
            .membership
            .membership_changed(change.server_id, change.user_id),
        Err(e) => tracing::warn!(error = %e, payload, "Malformed membership notification"),
    }
}
