//! In-process Store implementation.
//!
//! Selected with `database.url = "memory://"`. Directory data (users, servers,
//! memberships, channels) lives behind one read-write lock; each channel's
//! message log has its own mutex so writers to different channels proceed in
//! parallel while writers to the same channel are serialized.
//!
//! Lock order: `directory` is never held while touching `logs` or a log
//! mutex. A deleted channel's log is marked closed so writers that already
//! hold its `Arc` fail with `NotFound`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::domain::{
    disambiguate_username, fallback_username, normalize_bio, normalize_channel_name,
    normalize_content, normalize_description, normalize_server_name, normalize_status,
    validate_nonce, Channel, ChannelKind, CreatedServer, JoinOutcome, Membership, Message,
    MessageQuery, NewMessage, PostOutcome, Server, Store, StoreError, User, DEFAULT_CHANNELS,
    NONCE_WINDOW_SECS,
};

#[derive(Default)]
struct Directory {
    users: HashMap<Uuid, User>,
    usernames: HashSet<String>,
    servers: HashMap<i64, Server>,
    members: HashMap<(i64, Uuid), Membership>,
    channels: HashMap<i64, Channel>,
}

/// Per-channel counter and log; `messages` is ascending by `seq`.
struct ChannelLog {
    closed: bool,
    next_seq: i64,
    last_created_at: Option<DateTime<Utc>>,
    messages: Vec<Message>,
}

impl ChannelLog {
    fn new() -> Self {
        Self {
            closed: false,
            next_seq: 1,
            last_created_at: None,
            messages: Vec::new(),
        }
    }

    fn position_after(&self, seq: i64) -> usize {
        self.messages.partition_point(|m| m.seq <= seq)
    }

    fn position_before(&self, seq: i64) -> usize {
        self.messages.partition_point(|m| m.seq < seq)
    }
}

/// Memory-backed store.
#[derive(Default)]
pub struct MemoryStore {
    directory: RwLock<Directory>,
    logs: DashMap<i64, Arc<Mutex<ChannelLog>>>,
    /// message_id -> (channel_id, seq)
    message_index: DashMap<i64, (i64, i64)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self, channel_id: i64) -> Result<Arc<Mutex<ChannelLog>>, StoreError> {
        self.logs
            .get(&channel_id)
            .map(|log| Arc::clone(log.value()))
            .ok_or(StoreError::NotFound("Channel"))
    }

    /// Register empty logs before the channels become visible in the directory.
    fn open_logs(&self, channel_ids: &[i64]) {
        for channel_id in channel_ids {
            self.logs
                .insert(*channel_id, Arc::new(Mutex::new(ChannelLog::new())));
        }
    }

    fn close_logs(&self, channel_ids: &[i64]) {
        for channel_id in channel_ids {
            if let Some((_, log)) = self.logs.remove(channel_id) {
                let mut log = log.lock();
                log.closed = true;
                for message in log.messages.drain(..) {
                    self.message_index.remove(&message.id);
                }
            }
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ensure_user(&self, user_id: Uuid, username: &str) -> Result<User, StoreError> {
        let mut dir = self.directory.write();
        if let Some(user) = dir.users.get(&user_id) {
            return Ok(user.clone());
        }

        let base = if username.is_empty() {
            fallback_username(user_id)
        } else {
            username.to_string()
        };
        let mut candidate = base.clone();
        let mut attempt = 1;
        while dir.usernames.contains(&candidate) {
            attempt += 1;
            candidate = disambiguate_username(&base, attempt);
        }

        let user = User::new(user_id, candidate.clone());
        dir.usernames.insert(candidate);
        dir.users.insert(user_id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.directory.read().users.get(&user_id).cloned())
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        status: Option<String>,
        bio: Option<String>,
    ) -> Result<User, StoreError> {
        let status = status.as_deref().map(normalize_status).transpose()?;
        let bio = bio.as_deref().map(normalize_bio).transpose()?;

        let mut dir = self.directory.write();
        let user = dir
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::NotFound("User"))?;
        if let Some(status) = status {
            user.status = status;
        }
        if let Some(bio) = bio {
            user.bio = bio;
        }
        Ok(user.clone())
    }

    async fn create_server(
        &self,
        server_id: i64,
        owner: Uuid,
        name: &str,
        description: Option<&str>,
        default_channel_ids: [i64; 2],
    ) -> Result<CreatedServer, StoreError> {
        let name = normalize_server_name(name)?;
        let description = normalize_description(description)?;
        let now = Utc::now();
        self.open_logs(&default_channel_ids);

        let mut dir = self.directory.write();
        let lowered = name.to_lowercase();
        if dir
            .servers
            .values()
            .any(|s| s.owner_id == owner && s.name.to_lowercase() == lowered)
        {
            drop(dir);
            self.close_logs(&default_channel_ids);
            return Err(StoreError::Conflict(format!(
                "You already own a server named '{}'",
                name
            )));
        }

        let server = Server {
            id: server_id,
            name,
            description,
            owner_id: owner,
            created_at: now,
        };
        dir.servers.insert(server_id, server.clone());
        dir.members.insert(
            (server_id, owner),
            Membership {
                server_id,
                user_id: owner,
                joined_at: now,
            },
        );

        let channels: Vec<Channel> = DEFAULT_CHANNELS
            .iter()
            .zip(default_channel_ids)
            .map(|(name, id)| Channel {
                id,
                server_id,
                name: name.to_string(),
                kind: ChannelKind::Text,
                created_at: now,
            })
            .collect();
        for channel in &channels {
            dir.channels.insert(channel.id, channel.clone());
        }

        Ok(CreatedServer { server, channels })
    }

    async fn get_server(&self, server_id: i64) -> Result<Option<Server>, StoreError> {
        Ok(self.directory.read().servers.get(&server_id).cloned())
    }

    async fn delete_server(&self, server_id: i64) -> Result<(), StoreError> {
        let channel_ids: Vec<i64> = {
            let mut dir = self.directory.write();
            if dir.servers.remove(&server_id).is_none() {
                return Err(StoreError::NotFound("Server"));
            }
            dir.members.retain(|(sid, _), _| *sid != server_id);

            let channel_ids: Vec<i64> = dir
                .channels
                .values()
                .filter(|c| c.server_id == server_id)
                .map(|c| c.id)
                .collect();
            for channel_id in &channel_ids {
                dir.channels.remove(channel_id);
            }
            channel_ids
        };

        self.close_logs(&channel_ids);
        Ok(())
    }

    async fn join_server(&self, server_id: i64, user_id: Uuid) -> Result<JoinOutcome, StoreError> {
        let mut dir = self.directory.write();
        if !dir.servers.contains_key(&server_id) {
            return Err(StoreError::NotFound("Server"));
        }
        if let Some(existing) = dir.members.get(&(server_id, user_id)) {
            return Ok(JoinOutcome {
                membership: existing.clone(),
                already: true,
            });
        }

        let membership = Membership {
            server_id,
            user_id,
            joined_at: Utc::now(),
        };
        dir.members.insert((server_id, user_id), membership.clone());
        Ok(JoinOutcome {
            membership,
            already: false,
        })
    }

    async fn leave_server(&self, server_id: i64, user_id: Uuid) -> Result<bool, StoreError> {
        let mut dir = self.directory.write();
        let server = dir
            .servers
            .get(&server_id)
            .ok_or(StoreError::NotFound("Server"))?;
        if server.is_owner(user_id) {
            return Err(StoreError::Conflict(
                "The owner cannot leave their own server".into(),
            ));
        }
        Ok(dir.members.remove(&(server_id, user_id)).is_some())
    }

    async fn is_member(&self, server_id: i64, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .directory
            .read()
            .members
            .contains_key(&(server_id, user_id)))
    }

    async fn list_user_servers(&self, user_id: Uuid) -> Result<Vec<Server>, StoreError> {
        let dir = self.directory.read();
        let mut servers: Vec<(DateTime<Utc>, Server)> = dir
            .members
            .values()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| dir.servers.get(&m.server_id).map(|s| (m.joined_at, s.clone())))
            .collect();
        servers.sort_by_key(|(joined_at, s)| (*joined_at, s.id));
        Ok(servers.into_iter().map(|(_, s)| s).collect())
    }

    async fn create_channel(
        &self,
        channel_id: i64,
        server_id: i64,
        name: &str,
        kind: ChannelKind,
    ) -> Result<Channel, StoreError> {
        let name = normalize_channel_name(name)?;
        self.open_logs(&[channel_id]);

        let mut dir = self.directory.write();
        let rejected = if !dir.servers.contains_key(&server_id) {
            Some(StoreError::NotFound("Server"))
        } else if dir
            .channels
            .values()
            .any(|c| c.server_id == server_id && c.name == name)
        {
            Some(StoreError::Conflict(format!(
                "Channel '{}' already exists in this server",
                name
            )))
        } else {
            None
        };
        if let Some(err) = rejected {
            drop(dir);
            self.close_logs(&[channel_id]);
            return Err(err);
        }

        let channel = Channel {
            id: channel_id,
            server_id,
            name,
            kind,
            created_at: Utc::now(),
        };
        dir.channels.insert(channel_id, channel.clone());
        Ok(channel)
    }

    async fn get_channel(&self, channel_id: i64) -> Result<Option<Channel>, StoreError> {
        Ok(self.directory.read().channels.get(&channel_id).cloned())
    }

    async fn list_server_channels(&self, server_id: i64) -> Result<Vec<Channel>, StoreError> {
        let dir = self.directory.read();
        let mut channels: Vec<Channel> = dir
            .channels
            .values()
            .filter(|c| c.server_id == server_id)
            .cloned()
            .collect();
        channels.sort_by_key(|c| (c.created_at, c.id));
        Ok(channels)
    }

    async fn post_message(
        &self,
        message_id: i64,
        message: NewMessage,
    ) -> Result<PostOutcome, StoreError> {
        let content = normalize_content(&message.content)?;
        let nonce = validate_nonce(message.nonce.as_deref())?;

        let username = {
            let dir = self.directory.read();
            let channel = dir
                .channels
                .get(&message.channel_id)
                .ok_or(StoreError::NotFound("Channel"))?;
            if !channel.kind.carries_messages() {
                return Err(StoreError::Invalid(
                    "Voice channels do not carry messages".into(),
                ));
            }
            if !dir.members.contains_key(&(channel.server_id, message.user_id)) {
                return Err(StoreError::Forbidden);
            }
            dir.users
                .get(&message.user_id)
                .map(|u| u.username.clone())
                .unwrap_or_else(|| fallback_username(message.user_id))
        };

        let log = self.log(message.channel_id)?;
        let mut log = log.lock();
        // Deleted while we waited for the lock
        if log.closed {
            return Err(StoreError::NotFound("Channel"));
        }

        let now = Utc::now();
        if let Some(nonce) = &nonce {
            let window_start = now - Duration::seconds(NONCE_WINDOW_SECS);
            let original = log
                .messages
                .iter()
                .rev()
                .take_while(|m| m.created_at > window_start)
                .find(|m| m.user_id == message.user_id && m.nonce.as_ref() == Some(nonce));
            if let Some(original) = original {
                return Ok(PostOutcome {
                    message: original.clone(),
                    created: false,
                });
            }
        }

        let created_at = match log.last_created_at {
            Some(last) if last > now => last,
            _ => now,
        };
        let stored = Message {
            id: message_id,
            channel_id: message.channel_id,
            user_id: message.user_id,
            username,
            content,
            nonce,
            seq: log.next_seq,
            created_at,
        };

        log.next_seq += 1;
        log.last_created_at = Some(created_at);
        log.messages.push(stored.clone());
        self.message_index
            .insert(stored.id, (stored.channel_id, stored.seq));

        Ok(PostOutcome {
            message: stored,
            created: true,
        })
    }

    async fn list_messages(
        &self,
        channel_id: i64,
        query: MessageQuery,
    ) -> Result<Vec<Message>, StoreError> {
        if !self.directory.read().channels.contains_key(&channel_id) {
            return Err(StoreError::NotFound("Channel"));
        }

        let limit = query.effective_limit() as usize;
        let log = self.log(channel_id)?;
        let log = log.lock();

        let end = match query.before_seq {
            Some(before) => log.position_before(before),
            None => log.messages.len(),
        };
        let page = match query.after_seq {
            Some(after) => {
                let start = log.position_after(after).min(end);
                &log.messages[start..end.min(start + limit)]
            }
            None => &log.messages[end.saturating_sub(limit)..end],
        };
        Ok(page.to_vec())
    }

    async fn get_message(&self, message_id: i64) -> Result<Option<Message>, StoreError> {
        let Some(entry) = self.message_index.get(&message_id) else {
            return Ok(None);
        };
        let (channel_id, seq) = *entry;
        drop(entry);

        let Ok(log) = self.log(channel_id) else {
            return Ok(None);
        };
        let log = log.lock();
        let found = log
            .messages
            .binary_search_by_key(&seq, |m| m.seq)
            .ok()
            .map(|idx| log.messages[idx].clone());
        Ok(found)
    }

    async fn current_seq(&self, channel_id: i64) -> Result<i64, StoreError> {
        if !self.directory.read().channels.contains_key(&channel_id) {
            return Err(StoreError::NotFound("Channel"));
        }
        let log = self.log(channel_id)?;
        let next_seq = log.lock().next_seq;
        Ok(next_seq - 1)
    }

    async fn purge_messages_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let logs: Vec<Arc<Mutex<ChannelLog>>> = self
            .logs
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut removed = 0u64;
        for log in logs {
            let mut log = log.lock();
            let keep_from = log.messages.partition_point(|m| m.created_at < cutoff);
            for message in log.messages.drain(..keep_from) {
                self.message_index.remove(&message.id);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicI64, Ordering};

    static NEXT_ID: AtomicI64 = AtomicI64::new(1000);

    fn id() -> i64 {
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    }

    async fn server_with_owner(store: &MemoryStore) -> (Uuid, CreatedServer) {
        let owner = Uuid::new_v4();
        store.ensure_user(owner, "owner").await.unwrap();
        let created = store
            .create_server(id(), owner, "Retro", None, [id(), id()])
            .await
            .unwrap();
        (owner, created)
    }

    fn post(channel_id: i64, user_id: Uuid, content: &str) -> NewMessage {
        NewMessage {
            channel_id,
            user_id,
            content: content.into(),
            nonce: None,
        }
    }

    #[tokio::test]
    async fn test_create_server_adds_owner_and_default_channels() {
        let store = MemoryStore::new();
        let (owner, created) = server_with_owner(&store).await;

        let names: Vec<&str> = created.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["general", "random"]);
        assert!(store.is_member(created.server.id, owner).await.unwrap());
        assert_eq!(
            store.list_server_channels(created.server.id).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_create_server_name_conflict_per_owner() {
        let store = MemoryStore::new();
        let (owner, _) = server_with_owner(&store).await;

        let dup = store
            .create_server(id(), owner, "retro", None, [id(), id()])
            .await;
        assert!(matches!(dup, Err(StoreError::Conflict(_))));

        // A different owner may reuse the name
        let other = Uuid::new_v4();
        assert!(store
            .create_server(id(), other, "Retro", None, [id(), id()])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_create_channel_conflict_is_case_insensitive() {
        let store = MemoryStore::new();
        let (_, created) = server_with_owner(&store).await;

        let result = store
            .create_channel(id(), created.server.id, "GENERAL", ChannelKind::Text)
            .await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_seq_is_dense_under_concurrency() {
        let store = Arc::new(MemoryStore::new());
        let (owner, created) = server_with_owner(&store).await;
        let channel_id = created.channels[0].id;

        let mut handles = Vec::new();
        for i in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .post_message(id(), post(channel_id, owner, &format!("m{}", i)))
                    .await
                    .unwrap()
                    .message
                    .seq
            }));
        }

        let mut seqs = Vec::new();
        for handle in handles {
            seqs.push(handle.await.unwrap());
        }
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=64).collect::<Vec<i64>>());
        assert_eq!(store.current_seq(channel_id).await.unwrap(), 64);

        let listed = store
            .list_messages(channel_id, MessageQuery::after(0, 200))
            .await
            .unwrap();
        assert!(listed
            .windows(2)
            .all(|w| w[1].seq == w[0].seq + 1 && w[1].created_at >= w[0].created_at));
    }

    #[tokio::test]
    async fn test_nonce_returns_original_message() {
        let store = MemoryStore::new();
        let (owner, created) = server_with_owner(&store).await;
        let channel_id = created.channels[0].id;

        let mut first = post(channel_id, owner, "x");
        first.nonce = Some("nonce-0000000001".into());
        let a = store.post_message(id(), first.clone()).await.unwrap();
        let b = store.post_message(id(), first).await.unwrap();

        assert!(a.created);
        assert!(!b.created);
        assert_eq!(a.message.id, b.message.id);
        assert_eq!(store.current_seq(channel_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_nonce_from_other_user_is_distinct() {
        let store = MemoryStore::new();
        let (owner, created) = server_with_owner(&store).await;
        let channel_id = created.channels[0].id;
        let guest = Uuid::new_v4();
        store.join_server(created.server.id, guest).await.unwrap();

        let nonce = Some("shared-nonce-value".to_string());
        let mut a = post(channel_id, owner, "a");
        a.nonce = nonce.clone();
        let mut b = post(channel_id, guest, "b");
        b.nonce = nonce;

        let a = store.post_message(id(), a).await.unwrap();
        let b = store.post_message(id(), b).await.unwrap();
        assert!(a.created && b.created);
        assert_eq!(b.message.seq, 2);
    }

    #[tokio::test]
    async fn test_non_member_post_is_forbidden() {
        let store = MemoryStore::new();
        let (_, created) = server_with_owner(&store).await;
        let channel_id = created.channels[0].id;

        let outsider = Uuid::new_v4();
        let result = store.post_message(id(), post(channel_id, outsider, "hi")).await;
        assert!(matches!(result, Err(StoreError::Forbidden)));
        assert_eq!(store.current_seq(channel_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_post_to_missing_channel_or_voice_channel() {
        let store = MemoryStore::new();
        let (owner, created) = server_with_owner(&store).await;

        let missing = store.post_message(id(), post(42, owner, "hi")).await;
        assert!(matches!(missing, Err(StoreError::NotFound("Channel"))));

        let voice = store
            .create_channel(id(), created.server.id, "lounge", ChannelKind::Voice)
            .await
            .unwrap();
        let result = store.post_message(id(), post(voice.id, owner, "hi")).await;
        assert!(matches!(result, Err(StoreError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_list_messages_windows() {
        let store = MemoryStore::new();
        let (owner, created) = server_with_owner(&store).await;
        let channel_id = created.channels[0].id;
        for i in 1..=10 {
            store
                .post_message(id(), post(channel_id, owner, &i.to_string()))
                .await
                .unwrap();
        }

        let seqs = |messages: Vec<Message>| messages.iter().map(|m| m.seq).collect::<Vec<_>>();

        // after_seq = k, limit = n -> k < seq <= min(k + n, current)
        let page = store
            .list_messages(channel_id, MessageQuery::after(3, 4))
            .await
            .unwrap();
        assert_eq!(seqs(page), vec![4, 5, 6, 7]);

        let page = store
            .list_messages(channel_id, MessageQuery::after(8, 50))
            .await
            .unwrap();
        assert_eq!(seqs(page), vec![9, 10]);

        // No bounds -> most recent, ascending
        let page = store
            .list_messages(
                channel_id,
                MessageQuery {
                    limit: Some(3),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(seqs(page), vec![8, 9, 10]);

        // before_seq only -> the newest messages below the bound
        let page = store
            .list_messages(
                channel_id,
                MessageQuery {
                    before_seq: Some(5),
                    after_seq: None,
                    limit: Some(2),
                },
            )
            .await
            .unwrap();
        assert_eq!(seqs(page), vec![3, 4]);

        // Both bounds
        let page = store
            .list_messages(
                channel_id,
                MessageQuery {
                    before_seq: Some(6),
                    after_seq: Some(2),
                    limit: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(seqs(page), vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_join_is_idempotent_and_leave_keeps_messages() {
        let store = MemoryStore::new();
        let (owner, created) = server_with_owner(&store).await;
        let server_id = created.server.id;
        let channel_id = created.channels[0].id;
        let guest = Uuid::new_v4();

        assert!(!store.join_server(server_id, guest).await.unwrap().already);
        assert!(store.join_server(server_id, guest).await.unwrap().already);

        store
            .post_message(id(), post(channel_id, guest, "bye"))
            .await
            .unwrap();
        assert!(store.leave_server(server_id, guest).await.unwrap());

        let history = store
            .list_messages(channel_id, MessageQuery::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user_id, guest);

        let again = store.post_message(id(), post(channel_id, guest, "back")).await;
        assert!(matches!(again, Err(StoreError::Forbidden)));

        let owner_leave = store.leave_server(server_id, owner).await;
        assert!(matches!(owner_leave, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_delete_server_cascades() {
        let store = MemoryStore::new();
        let (owner, created) = server_with_owner(&store).await;
        let channel_id = created.channels[0].id;
        let posted = store
            .post_message(id(), post(channel_id, owner, "doomed"))
            .await
            .unwrap();

        store.delete_server(created.server.id).await.unwrap();

        assert!(store.get_channel(channel_id).await.unwrap().is_none());
        assert!(store.get_message(posted.message.id).await.unwrap().is_none());
        assert!(!store.is_member(created.server.id, owner).await.unwrap());
        assert!(store.list_user_servers(owner).await.unwrap().is_empty());
    }

    #[test]
    fn test_delete_server_races_posts_without_deadlock() {
        use futures::executor::block_on;
        use std::sync::mpsc;
        use std::thread;

        let store = Arc::new(MemoryStore::new());
        let (done_tx, done_rx) = mpsc::channel();

        thread::spawn({
            let store = Arc::clone(&store);
            move || {
                for _ in 0..50 {
                    let (owner, created) = block_on(server_with_owner(&store));
                    let server_id = created.server.id;
                    let channel_id = created.channels[0].id;

                    let writers: Vec<_> = (0..3)
                        .map(|_| {
                            let store = Arc::clone(&store);
                            thread::spawn(move || loop {
                                let posted =
                                    block_on(store.post_message(id(), post(channel_id, owner, "x")));
                                match posted {
                                    Ok(_) => continue,
                                    Err(StoreError::NotFound(_)) => break,
                                    Err(e) => panic!("unexpected error: {}", e),
                                }
                            })
                        })
                        .collect();

                    thread::sleep(std::time::Duration::from_millis(1));
                    block_on(store.delete_server(server_id)).unwrap();
                    for writer in writers {
                        writer.join().unwrap();
                    }

                    assert!(block_on(store.get_channel(channel_id)).unwrap().is_none());
                    assert!(matches!(
                        block_on(store.current_seq(channel_id)),
                        Err(StoreError::NotFound(_))
                    ));
                }
                done_tx.send(()).unwrap();
            }
        });

        done_rx
            .recv_timeout(std::time::Duration::from_secs(30))
            .expect("delete_server and post_message stopped making progress");
    }

    #[test]
    fn test_purge_races_posts_and_channel_creation() {
        use futures::executor::block_on;
        use std::sync::mpsc;
        use std::thread;

        let store = Arc::new(MemoryStore::new());
        let (owner, created) = block_on(server_with_owner(&store));
        let server_id = created.server.id;
        let channel_id = created.channels[0].id;
        let (done_tx, done_rx) = mpsc::channel();

        let handles = vec![
            thread::spawn({
                let store = Arc::clone(&store);
                move || {
                    for _ in 0..500 {
                        block_on(store.post_message(id(), post(channel_id, owner, "x"))).unwrap();
                    }
                }
            }),
            thread::spawn({
                let store = Arc::clone(&store);
                move || {
                    for i in 0..200 {
                        let name = format!("extra-{}", i);
                        block_on(store.create_channel(id(), server_id, &name, ChannelKind::Text))
                            .unwrap();
                    }
                }
            }),
            thread::spawn({
                let store = Arc::clone(&store);
                move || {
                    for _ in 0..200 {
                        block_on(store.purge_messages_before(Utc::now())).unwrap();
                    }
                }
            }),
        ];

        thread::spawn(move || {
            for handle in handles {
                handle.join().unwrap();
            }
            done_tx.send(()).unwrap();
        });

        done_rx
            .recv_timeout(std::time::Duration::from_secs(30))
            .expect("purge, post and create_channel stopped making progress");
        assert_eq!(block_on(store.current_seq(channel_id)).unwrap(), 500);
    }

    #[tokio::test]
    async fn test_ensure_user_disambiguates_usernames() {
        let store = MemoryStore::new();
        let a = store.ensure_user(Uuid::new_v4(), "neon").await.unwrap();
        let b = store.ensure_user(Uuid::new_v4(), "neon").await.unwrap();
        assert_eq!(a.username, "neon");
        assert_eq!(b.username, "neon-2");

        // Existing users are returned unchanged
        let again = store.ensure_user(a.id, "renamed").await.unwrap();
        assert_eq!(again.username, "neon");
    }

    #[tokio::test]
    async fn test_purge_keeps_sequence_counter() {
        let store = MemoryStore::new();
        let (owner, created) = server_with_owner(&store).await;
        let channel_id = created.channels[0].id;
        store
            .post_message(id(), post(channel_id, owner, "old"))
            .await
            .unwrap();

        let removed = store
            .purge_messages_before(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let next = store
            .post_message(id(), post(channel_id, owner, "new"))
            .await
            .unwrap();
        assert_eq!(next.message.seq, 2);
    }

    #[tokio::test]
    async fn test_update_profile() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store.ensure_user(user_id, "synth").await.unwrap();

        let user = store
            .update_profile(user_id, Some("  vibing ".into()), None)
            .await
            .unwrap();
        assert_eq!(user.status, "vibing");
        assert_eq!(user.bio, "");

        let too_long = store
            .update_profile(user_id, None, Some("b".repeat(2000)))
            .await;
        assert!(matches!(too_long, Err(StoreError::Invalid(_))));
    }
}
