//! Profile Service

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::{Store, User};
use crate::shared::error::AppError;

pub struct ProfileService {
    store: Arc<dyn Store>,
}

impl ProfileService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn me(&self, user_id: Uuid) -> Result<User, AppError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))
    }

    pub async fn update(
        &self,
        user_id: Uuid,
        status: Option<String>,
        bio: Option<String>,
    ) -> Result<User, AppError> {
        Ok(self.store.update_profile(user_id, status, bio).await?)
    }
}
