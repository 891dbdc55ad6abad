//! Authorizer
//!
//! Resolves bearer tokens to users and answers membership and ownership
//! questions. Positive membership answers are cached for `ttl`; negative
//! answers always go to the Store so a fresh join takes effect immediately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::{sanitize_username, MembershipObserver, Server, Store};
use crate::infrastructure::auth::TokenVerifier;
use crate::shared::error::AppError;

/// How long a user row is assumed to exist after `ensure_user`
const KNOWN_USER_TTL: Duration = Duration::from_secs(600);

pub struct Authorizer {
    verifier: Arc<dyn TokenVerifier>,
    store: Arc<dyn Store>,
    ttl: Duration,
    members: DashMap<(i64, Uuid), Instant>,
    known_users: DashMap<Uuid, Instant>,
}

impl Authorizer {
    pub fn new(verifier: Arc<dyn TokenVerifier>, store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            verifier,
            store,
            ttl,
            members: DashMap::new(),
            known_users: DashMap::new(),
        }
    }

    /// `authenticate(bearer_token) -> user_id | Unauthenticated`
    ///
    /// The first successful authentication of a user in this process also
    /// creates their profile row.
    pub async fn authenticate(&self, token: &str) -> Result<Uuid, AppError> {
        let verified = self.verifier.verify(token).await?;
        let user_id = verified.user_id;

        let known = self
            .known_users
            .get(&user_id)
            .is_some_and(|seen| seen.elapsed() < KNOWN_USER_TTL);
        if !known {
            let username = sanitize_username(verified.username.as_deref(), user_id);
            let user = self.store.ensure_user(user_id, &username).await?;
            tracing::debug!(user_id = %user_id, username = %user.username, "User ensured");
            self.known_users.insert(user_id, Instant::now());
        }

        Ok(user_id)
    }

    pub async fn is_member(&self, user_id: Uuid, server_id: i64) -> Result<bool, AppError> {
        let key = (server_id, user_id);
        if let Some(cached) = self.members.get(&key) {
            if cached.elapsed() < self.ttl {
                return Ok(true);
            }
        }
        self.members.remove_if(&key, |_, at| at.elapsed() >= self.ttl);

        let member = self.store.is_member(server_id, user_id).await?;
        if member {
            self.members.insert(key, Instant::now());
        }
        Ok(member)
    }

    /// `require_member(user_id, server_id) -> Ok | Forbidden`
    pub async fn require_member(&self, user_id: Uuid, server_id: i64) -> Result<(), AppError> {
        if self.is_member(user_id, server_id).await? {
            Ok(())
        } else {
            Err(AppError::Forbidden("Not a member of this server".into()))
        }
    }

    /// `require_owner(user_id, server_id) -> Ok | Forbidden`
    pub async fn require_owner(&self, user_id: Uuid, server_id: i64) -> Result<Server, AppError> {
        let server = self
            .store
            .get_server(server_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Server not found".into()))?;

        if server.is_owner(user_id) {
            Ok(server)
        } else {
            Err(AppError::Forbidden(
                "Only the server owner can do that".into(),
            ))
        }
    }

    /// Drop a cached membership answer.
    pub fn invalidate(&self, server_id: i64, user_id: Uuid) {
        self.members.remove(&(server_id, user_id));
    }

    /// Drop cache entries that have outlived their TTL. Returns how many went.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    fn evict_expired_at(&self, now: Instant) -> usize {
        let before = self.members.len() + self.known_users.len();
        self.members
            .retain(|_, at| now.saturating_duration_since(*at) < self.ttl);
        self.known_users
            .retain(|_, at| now.saturating_duration_since(*at) < KNOWN_USER_TTL);
        before.saturating_sub(self.members.len() + self.known_users.len())
    }
}

impl MembershipObserver for Authorizer {
    fn membership_changed(&self, server_id: i64, user_id: Uuid) {
        self.invalidate(server_id, user_id);
    }
}
