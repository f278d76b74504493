use async_trait::async_trait;
use sqlx::PgPool;

use super::repo_types::User;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateKey,
    #[error("user not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence for user records. Implementations enforce email uniqueness
/// themselves and report a clash as [`StoreError::DuplicateKey`].
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: &User) -> Result<(), StoreError>;
    async fn get_by_id(&self, id: &str) -> Result<User, StoreError>;
    async fn get_by_email(&self, email: &str) -> Result<User, StoreError>;
    async fn update(&self, user: &User) -> Result<(), StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
    /// Most recently created first.
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>, StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

const UNIQUE_VIOLATION: &str = "23505";

fn write_error(e: sqlx::Error) -> StoreError {
    let unique = matches!(
        &e,
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION)
    );
    if unique {
        StoreError::DuplicateKey
    } else {
        StoreError::Database(e)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, phone, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.db)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, phone, password_hash, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, phone, password_hash, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET name = $2, email = $3, phone = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(user.updated_at)
        .execute(&self.db)
        .await
        .map_err(write_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, phone, password_hash, created_at, updated_at
            FROM users
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}
