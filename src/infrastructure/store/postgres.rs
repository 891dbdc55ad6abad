//! PostgreSQL Store implementation.
//!
//! Per-channel `seq` values come from the `channel_cursors` row, locked with
//! `SELECT ... FOR UPDATE` for the duration of the insert transaction. Writers
//! to different channels lock different rows and proceed in parallel.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::{
    disambiguate_username, fallback_username, normalize_bio, normalize_channel_name,
    normalize_content, normalize_description, normalize_server_name, normalize_status,
    validate_nonce, Channel, ChannelKind, CreatedServer, JoinOutcome, Membership, Message,
    MessageQuery, NewMessage, PostOutcome, Server, Store, StoreError, User, DEFAULT_CHANNELS,
    NONCE_WINDOW_SECS,
};
use crate::infrastructure::metrics;

/// Backoff before each retry of a transient post failure
const RETRY_DELAYS_MS: [u64; 3] = [10, 30, 80];

/// Attempts at finding a free username before giving up
const USERNAME_ATTEMPTS: u32 = 16;

const UNIQUE_VIOLATION: &str = "23505";

/// Postgres-backed store.
///
/// `origin` identifies this process in commit notifications so the
/// LISTEN relay can skip events it already published locally.
pub struct PgStore {
    pool: PgPool,
    origin: String,
}

impl PgStore {
    pub fn new(pool: PgPool, origin: impl Into<String>) -> Self {
        Self {
            pool,
            origin: origin.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn try_post(
        &self,
        message_id: i64,
        message: &NewMessage,
        content: &str,
        nonce: Option<&str>,
    ) -> Result<PostOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT set_config('app.origin', $1, true)")
            .bind(&self.origin)
            .execute(&mut *tx)
            .await?;

        let channel: Option<(i64, String)> =
            sqlx::query_as("SELECT server_id, kind::text FROM channels WHERE id = $1")
                .bind(message.channel_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (server_id, kind) = channel.ok_or(StoreError::NotFound("Channel"))?;
        if !ChannelKind::parse(&kind).is_some_and(|k| k.carries_messages()) {
            return Err(StoreError::Invalid(
                "Voice channels do not carry messages".into(),
            ));
        }

        let username: Option<String> = sqlx::query_scalar(
            r#"
            SELECT u.username
            FROM server_members m
            JOIN users u ON u.id = m.user_id
            WHERE m.server_id = $1 AND m.user_id = $2
            "#,
        )
        .bind(server_id)
        .bind(message.user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let username = username.ok_or(StoreError::Forbidden)?;

        let cursor: Option<(i64, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT next_seq, last_created_at FROM channel_cursors WHERE channel_id = $1 FOR UPDATE",
        )
        .bind(message.channel_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (seq, last_created_at) = cursor.ok_or(StoreError::NotFound("Channel"))?;

        let now = Utc::now();
        if let Some(nonce) = nonce {
            let window_start = now - chrono::Duration::seconds(NONCE_WINDOW_SECS);
            let original = sqlx::query_as::<_, MessageRow>(
                r#"
                SELECT id, channel_id, user_id, username, content, nonce, seq, created_at
                FROM messages
                WHERE channel_id = $1 AND user_id = $2 AND nonce = $3 AND created_at > $4
                ORDER BY seq DESC
                LIMIT 1
                "#,
            )
            .bind(message.channel_id)
            .bind(message.user_id)
            .bind(nonce)
            .bind(window_start)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(original) = original {
                tx.rollback().await?;
                return Ok(PostOutcome {
                    message: original.into(),
                    created: false,
                });
            }
        }

        let created_at = match last_created_at {
            Some(last) if last > now => last,
            _ => now,
        };

        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (id, channel_id, user_id, username, content, nonce, seq, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, channel_id, user_id, username, content, nonce, seq, created_at
            "#,
        )
        .bind(message_id)
        .bind(message.channel_id)
        .bind(message.user_id)
        .bind(&username)
        .bind(content)
        .bind(nonce)
        .bind(seq)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE channel_cursors SET next_seq = next_seq + 1, last_created_at = $2 WHERE channel_id = $1",
        )
        .bind(message.channel_id)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(PostOutcome {
            message: row.into(),
            created: true,
        })
    }

    async fn insert_channel(
        tx: &mut Transaction<'static, Postgres>,
        channel_id: i64,
        server_id: i64,
        name: &str,
        kind: ChannelKind,
    ) -> Result<Channel, StoreError> {
        let row = sqlx::query_as::<_, ChannelRow>(
            r#"
            INSERT INTO channels (id, server_id, name, kind)
            VALUES ($1, $2, $3, $4::channel_kind)
            RETURNING id, server_id, name, kind::text AS kind, created_at
            "#,
        )
        .bind(channel_id)
        .bind(server_id)
        .bind(name)
        .bind(kind.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            conflict_or(
                e,
                format!("Channel '{}' already exists in this server", name),
            )
        })?;

        sqlx::query("INSERT INTO channel_cursors (channel_id) VALUES ($1)")
            .bind(channel_id)
            .execute(&mut **tx)
            .await?;

        Ok(row.into())
    }
}

fn conflict_or(err: sqlx::Error, message: String) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::Conflict(message)
        }
        _ => StoreError::Database(err),
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    status: String,
    bio: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            status: row.status,
            bio: row.bio,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ServerRow {
    id: i64,
    name: String,
    description: Option<String>,
    owner_id: Uuid,
    created_at: DateTime<Utc>,
}

impl From<ServerRow> for Server {
    fn from(row: ServerRow) -> Self {
        Server {
            id: row.id,
            name: row.name,
            description: row.description,
            owner_id: row.owner_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ChannelRow {
    id: i64,
    server_id: i64,
    name: String,
    kind: String, // PostgreSQL enum maps to string
    created_at: DateTime<Utc>,
}

impl From<ChannelRow> for Channel {
    fn from(row: ChannelRow) -> Self {
        Channel {
            id: row.id,
            server_id: row.server_id,
            name: row.name,
            kind: ChannelKind::parse(&row.kind).unwrap_or_default(),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    channel_id: i64,
    user_id: Uuid,
    username: String,
    content: String,
    nonce: Option<String>,
    seq: i64,
    created_at: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            channel_id: row.channel_id,
            user_id: row.user_id,
            username: row.username,
            content: row.content,
            nonce: row.nonce,
            seq: row.seq,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn ensure_user(&self, user_id: Uuid, username: &str) -> Result<User, StoreError> {
        if let Some(user) = self.get_user(user_id).await? {
            return Ok(user);
        }

        let base = if username.is_empty() {
            fallback_username(user_id)
        } else {
            username.to_string()
        };

        for attempt in 1..=USERNAME_ATTEMPTS {
            let candidate = if attempt == 1 {
                base.clone()
            } else {
                disambiguate_username(&base, attempt)
            };

            // Either conflict target is absorbed; the follow-up read tells them apart
            sqlx::query("INSERT INTO users (id, username) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(user_id)
                .bind(&candidate)
                .execute(&self.pool)
                .await?;

            if let Some(user) = self.get_user(user_id).await? {
                return Ok(user);
            }
        }

        Err(StoreError::Conflict(format!(
            "Could not allocate a unique username for '{}'",
            base
        )))
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, status, bio, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        status: Option<String>,
        bio: Option<String>,
    ) -> Result<User, StoreError> {
        let status = status.as_deref().map(normalize_status).transpose()?;
        let bio = bio.as_deref().map(normalize_bio).transpose()?;

        let row = sqlx::query_as::<_, UserRow>(
            r#"
            UPDATE users
            SET status = COALESCE($2, status),
                bio = COALESCE($3, bio)
            WHERE id = $1
            RETURNING id, username, status, bio, created_at
            "#,
        )
        .bind(user_id)
        .bind(status)
        .bind(bio)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Into::into).ok_or(StoreError::NotFound("User"))
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

        let mut tx = self.pool.begin().await?;

        let server: Server = sqlx::query_as::<_, ServerRow>(
            r#"
            INSERT INTO servers (id, name, description, owner_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, description, owner_id, created_at
            "#,
        )
        .bind(server_id)
        .bind(&name)
        .bind(&description)
        .bind(owner)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| conflict_or(e, format!("You already own a server named '{}'", name)))?
        .into();

        sqlx::query("INSERT INTO server_members (server_id, user_id) VALUES ($1, $2)")
            .bind(server_id)
            .bind(owner)
            .execute(&mut *tx)
            .await?;

        let mut channels = Vec::with_capacity(DEFAULT_CHANNELS.len());
        for (channel_name, channel_id) in DEFAULT_CHANNELS.iter().zip(default_channel_ids) {
            channels.push(
                Self::insert_channel(&mut tx, channel_id, server_id, channel_name, ChannelKind::Text)
                    .await?,
            );
        }

        tx.commit().await?;

        Ok(CreatedServer { server, channels })
    }

    async fn get_server(&self, server_id: i64) -> Result<Option<Server>, StoreError> {
        let row = sqlx::query_as::<_, ServerRow>(
            "SELECT id, name, description, owner_id, created_at FROM servers WHERE id = $1",
        )
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn delete_server(&self, server_id: i64) -> Result<(), StoreError> {
        // Channels, cursors, memberships and messages go with it via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM servers WHERE id = $1")
            .bind(server_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Server"));
        }
        Ok(())
    }

    async fn join_server(&self, server_id: i64, user_id: Uuid) -> Result<JoinOutcome, StoreError> {
        if self.get_server(server_id).await?.is_none() {
            return Err(StoreError::NotFound("Server"));
        }

        let inserted: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            INSERT INTO server_members (server_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (server_id, user_id) DO NOTHING
            RETURNING joined_at
            "#,
        )
        .bind(server_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let (joined_at, already) = match inserted {
            Some(joined_at) => (joined_at, false),
            None => {
                let existing: DateTime<Utc> = sqlx::query_scalar(
                    "SELECT joined_at FROM server_members WHERE server_id = $1 AND user_id = $2",
                )
                .bind(server_id)
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
                (existing, true)
            }
        };

        Ok(JoinOutcome {
            membership: Membership {
                server_id,
                user_id,
                joined_at,
            },
            already,
        })
    }

    async fn leave_server(&self, server_id: i64, user_id: Uuid) -> Result<bool, StoreError> {
        let server = self
            .get_server(server_id)
            .await?
            .ok_or(StoreError::NotFound("Server"))?;
        if server.is_owner(user_id) {
            return Err(StoreError::Conflict(
                "The owner cannot leave their own server".into(),
            ));
        }

        let result = sqlx::query("DELETE FROM server_members WHERE server_id = $1 AND user_id = $2")
            .bind(server_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn is_member(&self, server_id: i64, user_id: Uuid) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM server_members WHERE server_id = $1 AND user_id = $2)",
        )
        .bind(server_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn list_user_servers(&self, user_id: Uuid) -> Result<Vec<Server>, StoreError> {
        let rows = sqlx::query_as::<_, ServerRow>(
            r#"
            SELECT s.id, s.name, s.description, s.owner_id, s.created_at
            FROM servers s
            JOIN server_members m ON m.server_id = s.id
            WHERE m.user_id = $1
            ORDER BY m.joined_at, s.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_channel(
        &self,
        channel_id: i64,
        server_id: i64,
        name: &str,
        kind: ChannelKind,
    ) -> Result<Channel, StoreError> {
        let name = normalize_channel_name(name)?;
        if self.get_server(server_id).await?.is_none() {
            return Err(StoreError::NotFound("Server"));
        }

        let mut tx = self.pool.begin().await?;
        let channel = Self::insert_channel(&mut tx, channel_id, server_id, &name, kind).await?;
        tx.commit().await?;

        Ok(channel)
    }

    async fn get_channel(&self, channel_id: i64) -> Result<Option<Channel>, StoreError> {
        let row = sqlx::query_as::<_, ChannelRow>(
            "SELECT id, server_id, name, kind::text AS kind, created_at FROM channels WHERE id = $1",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_server_channels(&self, server_id: i64) -> Result<Vec<Channel>, StoreError> {
        let rows = sqlx::query_as::<_, ChannelRow>(
            r#"
            SELECT id, server_id, name, kind::text AS kind, created_at
            FROM channels
            WHERE server_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(server_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn post_message(
        &self,
        message_id: i64,
        message: NewMessage,
    ) -> Result<PostOutcome, StoreError> {
        let content = normalize_content(&message.content)?;
        let nonce = validate_nonce(message.nonce.as_deref())?;

        let mut attempt = 0;
        loop {
            match self
                .try_post(message_id, &message, &content, nonce.as_deref())
                .await
            {
                Err(e) if e.is_transient() && attempt < RETRY_DELAYS_MS.len() => {
                    let base = RETRY_DELAYS_MS[attempt];
                    let delay = base + rand::rng().random_range(0..=base / 2);
                    attempt += 1;
                    metrics::record_store_retry();
                    tracing::warn!(
                        channel_id = message.channel_id,
                        attempt,
                        delay_ms = delay,
                        error = %e,
                        "Retrying message post after transient failure"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                result => return result,
            }
        }
    }

    async fn list_messages(
        &self,
        channel_id: i64,
        query: MessageQuery,
    ) -> Result<Vec<Message>, StoreError> {
        if self.get_channel(channel_id).await?.is_none() {
            return Err(StoreError::NotFound("Channel"));
        }
        let limit = i64::from(query.effective_limit());

        let rows = if query.after_seq.is_some() {
            sqlx::query_as::<_, MessageRow>(
                r#"
                SELECT id, channel_id, user_id, username, content, nonce, seq, created_at
                FROM messages
                WHERE channel_id = $1
                  AND seq > $2
                  AND ($3::BIGINT IS NULL OR seq < $3)
                ORDER BY seq ASC
                LIMIT $4
                "#,
            )
            .bind(channel_id)
            .bind(query.after_seq)
            .bind(query.before_seq)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            // Newest first, reversed below
            let mut rows = sqlx::query_as::<_, MessageRow>(
                r#"
                SELECT id, channel_id, user_id, username, content, nonce, seq, created_at
                FROM messages
                WHERE channel_id = $1
                  AND ($2::BIGINT IS NULL OR seq < $2)
                ORDER BY seq DESC
                LIMIT $3
                "#,
            )
            .bind(channel_id)
            .bind(query.before_seq)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            rows.reverse();
            rows
        };

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_message(&self, message_id: i64) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, channel_id, user_id, username, content, nonce, seq, created_at
            FROM messages
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn current_seq(&self, channel_id: i64) -> Result<i64, StoreError> {
        let next: Option<i64> =
            sqlx::query_scalar("SELECT next_seq FROM channel_cursors WHERE channel_id = $1")
                .bind(channel_id)
                .fetch_optional(&self.pool)
                .await?;

        next.map(|n| n - 1).ok_or(StoreError::NotFound("Channel"))
    }

    async fn purge_messages_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
