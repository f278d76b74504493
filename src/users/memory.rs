//! In-memory user store for tests.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::repo::{StoreError, UserStore};
use super::repo_types::User;

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.email == user.email || u.id == user.id) {
            return Err(StoreError::DuplicateKey);
        }
        users.push(user.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<User, StoreError> {
        let users = self.users.read().await;
        users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError> {
        let users = self.users.read().await;
        users
            .iter()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.email == user.email && u.id != user.id) {
            return Err(StoreError::DuplicateKey);
        }
        let existing = users
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or(StoreError::NotFound)?;
        existing.name = user.name.clone();
        existing.email = user.email.clone();
        existing.phone = user.phone.clone();
        existing.updated_at = user.updated_at;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|u| u.id != id);
        if users.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>, StoreError> {
        let mut users = self.users.read().await.clone();
        users.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(users
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}
