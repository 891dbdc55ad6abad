//! Subscription Hub
//!
//! Tracks which connections are subscribed to which channels and delivers
//! commit events to them.
//!
//! Each subscription remembers the last `seq` it delivered. Events arrive
//! from the bus possibly duplicated or out of order: duplicates are dropped,
//! early events wait in a small reorder buffer until the gap closes. When a
//! connection's outbound queue is full, or a gap does not close in time, the
//! subscription is marked lagging and the client is told to resync.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::frames::ServerFrame;
use crate::application::services::Authorizer;
use crate::domain::{CommitEvent, Message, MessageQuery, Store, Subscriber};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("too many connections (limit {limit})")]
    TooManyConnections { limit: usize },

    #[error("connection closed")]
    Closed,
}

impl From<HubError> for AppError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::TooManyConnections { limit } => {
                tracing::debug!(limit, "Stream connection refused");
                AppError::RateLimited { retry_after_ms: 0 }
            }
            HubError::Closed => AppError::Internal("connection closed".into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound frames buffered per connection
    pub queue_capacity: usize,
    pub max_conn_per_user: usize,
    /// Messages per `history` frame during replay
    pub replay_batch: u32,
    /// How long an out-of-order gap may stay open
    pub reorder_hold: Duration,
    /// Early events held per subscription
    pub reorder_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_conn_per_user: 8,
            replay_batch: 200,
            reorder_hold: Duration::from_millis(500),
            reorder_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Replaying history; live events are buffered
    Syncing,
    Live,
    /// A resync was issued; events are dropped until the client resubscribes
    Lagging,
}

#[derive(Debug)]
struct Subscription {
    phase: Phase,
    last_delivered: i64,
    pending: BTreeMap<i64, Arc<Message>>,
    pending_since: Option<Instant>,
}

impl Subscription {
    fn syncing() -> Self {
        Self {
            phase: Phase::Syncing,
            last_delivered: 0,
            pending: BTreeMap::new(),
            pending_since: None,
        }
    }
}

/// One authenticated stream connection.
pub struct Connection {
    pub id: Uuid,
    pub user_id: Uuid,
    outbound: mpsc::Sender<ServerFrame>,
    reorder_capacity: usize,
    subs: Mutex<HashMap<i64, Subscription>>,
    resyncs: Mutex<Vec<(i64, i64)>>,
    resync_ready: Notify,
}

impl Connection {
    /// Queue a frame, waiting for room.
    pub async fn send(&self, frame: ServerFrame) -> Result<(), HubError> {
        self.outbound.send(frame).await.map_err(|_| HubError::Closed)
    }

    /// Queue a frame if there is room. Used for control frames.
    pub fn try_send(&self, frame: ServerFrame) -> bool {
        self.outbound.try_send(frame).is_ok()
    }

    /// Wakes when a resync frame is waiting.
    pub async fn resync_ready(&self) {
        self.resync_ready.notified().await
    }

    /// Resync frames owed to the client, in the order they were issued.
    pub fn take_resyncs(&self) -> Vec<ServerFrame> {
        std::mem::take(&mut *self.resyncs.lock())
            .into_iter()
            .map(|(channel_id, resume_from)| ServerFrame::Resync {
                channel_id,
                resume_from,
            })
            .collect()
    }

    pub fn subscribed_channels(&self) -> Vec<i64> {
        self.subs.lock().keys().copied().collect()
    }

    fn begin_sync(&self, channel_id: i64) {
        self.subs.lock().insert(channel_id, Subscription::syncing());
        self.resyncs.lock().retain(|(c, _)| *c != channel_id);
    }

    /// Record that everything up to `seq` has been queued. False if the
    /// subscription went away.
    fn advance(&self, channel_id: i64, seq: i64) -> bool {
        match self.subs.lock().get_mut(&channel_id) {
            Some(sub) => {
                sub.last_delivered = seq;
                true
            }
            None => false,
        }
    }

    fn go_live(&self, channel_id: i64) {
        let mut subs = self.subs.lock();
        if let Some(sub) = subs.get_mut(&channel_id) {
            if sub.phase == Phase::Syncing {
                sub.phase = Phase::Live;
                sub.pending_since = None;
                self.drain(channel_id, sub);
            }
        }
    }

    fn remove(&self, channel_id: i64) -> bool {
        self.resyncs.lock().retain(|(c, _)| *c != channel_id);
        self.subs.lock().remove(&channel_id).is_some()
    }

    fn deliver(&self, event: &CommitEvent) {
        let mut subs = self.subs.lock();
        let Some(sub) = subs.get_mut(&event.channel_id) else {
            return;
        };

        let seq = event.seq();
        if seq <= sub.last_delivered {
            return;
        }

        match sub.phase {
            Phase::Lagging => {}
            Phase::Syncing => self.hold(event.channel_id, sub, &event.message),
            Phase::Live if seq == sub.last_delivered + 1 => {
                if self.push(&event.message) {
                    sub.last_delivered = seq;
                    self.drain(event.channel_id, sub);
                } else {
                    self.lag(event.channel_id, sub, "queue_full");
                }
            }
            Phase::Live => self.hold(event.channel_id, sub, &event.message),
        }
    }

    fn hold(&self, channel_id: i64, sub: &mut Subscription, message: &Arc<Message>) {
        sub.pending.insert(message.seq, message.clone());
        sub.pending_since.get_or_insert_with(Instant::now);
        if sub.pending.len() > self.reorder_capacity {
            self.lag(channel_id, sub, "gap");
        }
    }

    /// Deliver buffered events that are now next in line.
    fn drain(&self, channel_id: i64, sub: &mut Subscription) {
        while let Some(entry) = sub.pending.first_entry() {
            let seq = *entry.key();
            if seq <= sub.last_delivered {
                entry.remove();
                continue;
            }
            if seq != sub.last_delivered + 1 {
                break;
            }
            let message = entry.remove();
            if !self.push(&message) {
                self.lag(channel_id, sub, "queue_full");
                return;
            }
            sub.last_delivered = seq;
        }

        sub.pending_since = if sub.pending.is_empty() {
            None
        } else {
            Some(sub.pending_since.unwrap_or_else(Instant::now))
        };
    }

    /// False only when the queue is full.
    fn push(&self, message: &Message) -> bool {
        match self.outbound.try_send(ServerFrame::msg(message)) {
            Ok(()) => {
                metrics::record_delivery();
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => false,
            // The writer is gone and cleanup will follow
            Err(mpsc::error::TrySendError::Closed(_)) => true,
        }
    }

    fn lag(&self, channel_id: i64, sub: &mut Subscription, reason: &'static str) {
        sub.phase = Phase::Lagging;
        sub.pending.clear();
        sub.pending_since = None;

        self.resyncs.lock().push((channel_id, sub.last_delivered));
        self.resync_ready.notify_one();
        metrics::record_dropped(reason);

        tracing::debug!(
            connection_id = %self.id,
            channel_id,
            resume_from = sub.last_delivered,
            reason,
            "Subscription lagging"
        );
    }

    fn sweep(&self, hold: Duration) {
        let mut subs = self.subs.lock();
        for (channel_id, sub) in subs.iter_mut() {
            let stale = sub.phase == Phase::Live
                && sub.pending_since.is_some_and(|since| since.elapsed() >= hold);
            if stale {
                self.lag(*channel_id, sub, "gap");
            }
        }
    }

    fn resync_all(&self, reason: &'static str) {
        let mut subs = self.subs.lock();
        for (channel_id, sub) in subs.iter_mut() {
            if sub.phase != Phase::Lagging {
                self.lag(*channel_id, sub, reason);
            }
        }
    }
}

type ChannelSubscribers = Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>;

pub struct Hub {
    store: Arc<dyn Store>,
    authorizer: Arc<Authorizer>,
    config: HubConfig,
    connections: DashMap<Uuid, Arc<Connection>>,
    channels: DashMap<i64, ChannelSubscribers>,
    per_user: DashMap<Uuid, usize>,
}

impl Hub {
    pub fn new(store: Arc<dyn Store>, authorizer: Arc<Authorizer>, config: HubConfig) -> Self {
        Self {
            store,
            authorizer,
            config,
            connections: DashMap::new(),
            channels: DashMap::new(),
            per_user: DashMap::new(),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Admit a connection for `user_id`, returning it with the receiving
    /// end of its outbound queue.
    pub fn register(
        &self,
        user_id: Uuid,
    ) -> Result<(Arc<Connection>, mpsc::Receiver<ServerFrame>), HubError> {
        {
            let mut count = self.per_user.entry(user_id).or_insert(0);
            if *count >= self.config.max_conn_per_user {
                return Err(HubError::TooManyConnections {
                    limit: self.config.max_conn_per_user,
                });
            }
            *count += 1;
        }

        let (outbound, receiver) = mpsc::channel(self.config.queue_capacity);
        let connection = Arc::new(Connection {
            id: Uuid::new_v4(),
            user_id,
            outbound,
            reorder_capacity: self.config.reorder_capacity,
            subs: Mutex::new(HashMap::new()),
            resyncs: Mutex::new(Vec::new()),
            resync_ready: Notify::new(),
        });
        self.connections.insert(connection.id, connection.clone());
        metrics::stream_connected();

        Ok((connection, receiver))
    }

    /// Remove a connection and all of its subscriptions.
    pub fn unregister(&self, connection: &Connection) {
        if self.connections.remove(&connection.id).is_none() {
            return;
        }
        for channel_id in connection.subscribed_channels() {
            connection.remove(channel_id);
            self.unindex(channel_id, connection.id);
        }

        if let Some(mut count) = self.per_user.get_mut(&connection.user_id) {
            *count = count.saturating_sub(1);
        }
        self.per_user.remove_if(&connection.user_id, |_, count| *count == 0);
        metrics::stream_disconnected();
    }

    /// Subscribe `connection` to a channel.
    ///
    /// With `since_seq`, history after it is replayed in `history` frames
    /// before live delivery starts; without it, delivery starts at the next
    /// commit. Live events that arrive during replay are buffered and
    /// delivered afterwards without duplicates.
    pub async fn subscribe(
        &self,
        connection: &Arc<Connection>,
        channel_id: i64,
        since_seq: Option<i64>,
    ) -> Result<(), AppError> {
        let channel = self
            .store
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Channel not found".into()))?;
        if !self
            .authorizer
            .is_member(connection.user_id, channel.server_id)
            .await?
        {
            return Err(AppError::NotFound("Channel not found".into()));
        }
        if !channel.kind.carries_messages() {
            return Err(AppError::Invalid(
                "Voice channels do not carry messages".into(),
            ));
        }

        // Attach before reading the cursor so no commit falls between the two
        connection.begin_sync(channel_id);
        self.index(channel_id, connection);

        let result = self.replay(connection, channel_id, since_seq).await;
        match &result {
            Ok(()) => connection.go_live(channel_id),
            Err(_) => self.unsubscribe(connection, channel_id),
        }

        tracing::debug!(
            connection_id = %connection.id,
            channel_id,
            since_seq,
            ok = result.is_ok(),
            "Subscribed"
        );
        result
    }

    async fn replay(
        &self,
        connection: &Connection,
        channel_id: i64,
        since_seq: Option<i64>,
    ) -> Result<(), AppError> {
        let current = self.store.current_seq(channel_id).await?;

        let Some(since) = since_seq else {
            connection.advance(channel_id, current);
            return Ok(());
        };

        let mut after = since.clamp(0, current);
        if !connection.advance(channel_id, after) {
            return Ok(());
        }

        let batch_size = self.config.replay_batch;
        loop {
            let batch = if after < current {
                self.store
                    .list_messages(channel_id, MessageQuery::after(after, batch_size))
                    .await?
            } else {
                Vec::new()
            };

            if let Some(last) = batch.last() {
                after = last.seq;
            }
            let done = after >= current || batch.len() < batch_size as usize;

            connection
                .send(ServerFrame::history(channel_id, &batch, done))
                .await?;
            if !connection.advance(channel_id, after) || done {
                return Ok(());
            }
        }
    }

    pub fn unsubscribe(&self, connection: &Connection, channel_id: i64) {
        if connection.remove(channel_id) {
            self.unindex(channel_id, connection.id);
        }
    }

    /// Issue resyncs for gaps held longer than the reorder window.
    pub fn sweep(&self) {
        for connection in self.connections.iter() {
            connection.sweep(self.config.reorder_hold);
        }
    }

    fn index(&self, channel_id: i64, connection: &Arc<Connection>) {
        // The entry guard is held while inserting so `unindex` cannot drop the set underneath us
        let entry = self.channels.entry(channel_id).or_default();
        entry.write().insert(connection.id, connection.clone());
    }

    fn unindex(&self, channel_id: i64, connection_id: Uuid) {
        if let Some(subscribers) = self.channels.get(&channel_id) {
            subscribers.write().remove(&connection_id);
        }
        self.channels
            .remove_if(&channel_id, |_, subscribers| subscribers.read().is_empty());
    }
}

impl Subscriber for Hub {
    fn on_commit(&self, event: &CommitEvent) {
        let Some(subscribers) = self.channels.get(&event.channel_id).map(|s| Arc::clone(s.value())) else {
            return;
        };
        for connection in subscribers.read().values() {
            connection.deliver(event);
        }
    }

    fn on_overflow(&self) {
        for connection in self.connections.iter() {
            connection.resync_all("overflow");
        }
    }
}

/// Periodically run `Hub::sweep`.
pub fn spawn_sweeper(hub: Arc<Hub>) -> JoinHandle<()> {
    let period = (hub.config.reorder_hold / 2).max(Duration::from_millis(50));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            hub.sweep();
        }
    })
}
