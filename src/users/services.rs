use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use super::{
    ids,
    phone::is_valid_phone,
    repo::{StoreError, UserStore},
    repo_types::User,
};
use crate::{
    auth::{
        jwt::{TokenError, TokenIssuer, TokenPair},
        password::CredentialHasher,
    },
    error::ServiceError,
};

pub const DEFAULT_PAGE_LIMIT: i64 = 10;
pub const MAX_PAGE_LIMIT: i64 = 100;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Non-positive limit falls back to the default, negative offset to zero.
pub fn normalize_page(limit: i64, offset: i64) -> (i64, i64) {
    let limit = if limit <= 0 {
        DEFAULT_PAGE_LIMIT
    } else {
        limit.min(MAX_PAGE_LIMIT)
    };
    (limit, offset.max(0))
}

fn required(value: &str, field: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        return Err(ServiceError::Validation(format!("{field} is required")));
    }
    Ok(())
}

/// Account management and login. Holds no mutable state of its own; the
/// store is the only shared resource.
pub struct UserService {
    store: Arc<dyn UserStore>,
    hasher: CredentialHasher,
    tokens: TokenIssuer,
}

impl UserService {
    pub fn new(store: Arc<dyn UserStore>, hasher: CredentialHasher, tokens: TokenIssuer) -> Self {
        Self {
            store,
            hasher,
            tokens,
        }
    }

    #[instrument(skip(self, name, phone, password))]
    pub async fn create_account(
        &self,
        name: &str,
        email: &str,
        phone: &str,
        password: &str,
    ) -> Result<User, ServiceError> {
        required(name, "name")?;
        required(email, "email")?;
        required(phone, "phone")?;
        if password.is_empty() {
            return Err(ServiceError::Validation("password is required".into()));
        }

        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(ServiceError::Validation("invalid email".into()));
        }
        if !is_valid_phone(phone) {
            return Err(ServiceError::Validation("invalid phone".into()));
        }

        // Advisory only; the unique constraint in the store settles races.
        match self.store.get_by_email(&email).await {
            Ok(_) => {
                warn!(email = %email, "email already registered");
                return Err(ServiceError::Conflict("email already registered".into()));
            }
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(ServiceError::storage("look up email")(e)),
        }

        let password_hash = self.hasher.hash(password)?;
        let id = ids::generate()?;

        let now = OffsetDateTime::now_utc();
        let user = User {
            id,
            name: name.trim().to_string(),
            email,
            phone: phone.to_string(),
            password_hash,
            created_at: now,
            updated_at: now,
        };

        match self.store.create(&user).await {
            Ok(()) => {}
            Err(StoreError::DuplicateKey) => {
                warn!(email = %user.email, "email registered concurrently");
                return Err(ServiceError::Conflict("email already registered".into()));
            }
            Err(e) => return Err(ServiceError::storage("create user")(e)),
        }

        info!(user_id = %user.id, "user created");
        Ok(user)
    }

    /// Unknown email and wrong password fail identically, so the response
    /// does not reveal which accounts exist.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<TokenPair, ServiceError> {
        required(email, "email")?;
        if password.is_empty() {
            return Err(ServiceError::Validation("password is required".into()));
        }

        let email = normalize_email(email);
        let user = match self.store.get_by_email(&email).await {
            Ok(u) => u,
            Err(StoreError::NotFound) => {
                warn!(email = %email, "login unknown email");
                return Err(ServiceError::InvalidCredentials);
            }
            Err(e) => return Err(ServiceError::storage("look up email")(e)),
        };

        if !self.hasher.verify(&user.password_hash, password)? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(ServiceError::InvalidCredentials);
        }

        let pair = self.tokens.issue_pair(&user.id)?;
        info!(user_id = %user.id, "user logged in");
        Ok(pair)
    }

    /// Trades a valid refresh token for a new pair, provided the subject
    /// still exists.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ServiceError> {
        let claims = self.tokens.verify_refresh(refresh_token).map_err(|e| match e {
            e @ TokenError::MissingSecret { .. } => ServiceError::Signing(e),
            e => {
                warn!(error = %e, "refresh token rejected");
                ServiceError::InvalidToken
            }
        })?;

        let user = match self.store.get_by_id(&claims.sub).await {
            Ok(u) => u,
            Err(StoreError::NotFound) => {
                warn!(user_id = %claims.sub, "refresh for deleted user");
                return Err(ServiceError::InvalidToken);
            }
            Err(e) => return Err(ServiceError::storage("get user")(e)),
        };

        let pair = self.tokens.issue_pair(&user.id)?;
        info!(user_id = %user.id, "tokens refreshed");
        Ok(pair)
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, id: &str) -> Result<User, ServiceError> {
        required(id, "id")?;
        self.store.get_by_id(id).await.map_err(not_found_or("get user"))
    }

    /// Empty fields are left unchanged.
    #[instrument(skip(self, name, phone))]
    pub async fn update_user(
        &self,
        id: &str,
        name: &str,
        email: &str,
        phone: &str,
    ) -> Result<User, ServiceError> {
        required(id, "id")?;
        let mut user = self.get_user(id).await?;

        if !name.trim().is_empty() {
            user.name = name.trim().to_string();
        }

        if !email.trim().is_empty() {
            let email = normalize_email(email);
            if !is_valid_email(&email) {
                return Err(ServiceError::Validation("invalid email".into()));
            }
            if email != user.email {
                match self.store.get_by_email(&email).await {
                    Ok(other) if other.id != user.id => {
                        warn!(user_id = %user.id, email = %email, "email already taken");
                        return Err(ServiceError::Conflict("email is already taken".into()));
                    }
                    Ok(_) | Err(StoreError::NotFound) => {}
                    Err(e) => return Err(ServiceError::storage("look up email")(e)),
                }
            }
            user.email = email;
        }

        if !phone.is_empty() {
            if !is_valid_phone(phone) {
                return Err(ServiceError::Validation("invalid phone".into()));
            }
            user.phone = phone.to_string();
        }

        user.updated_at = OffsetDateTime::now_utc();

        match self.store.update(&user).await {
            Ok(()) => {}
            Err(StoreError::DuplicateKey) => {
                return Err(ServiceError::Conflict("email is already taken".into()));
            }
            Err(StoreError::NotFound) => return Err(ServiceError::NotFound("user not found".into())),
            Err(e) => return Err(ServiceError::storage("update user")(e)),
        }

        info!(user_id = %user.id, "user updated");
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: &str) -> Result<(), ServiceError> {
        required(id, "id")?;
        self.get_user(id).await?;
        self.store
            .delete(id)
            .await
            .map_err(not_found_or("delete user"))?;
        info!(user_id = %id, "user deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_users(&self, limit: i64, offset: i64) -> Result<Vec<User>, ServiceError> {
        let (limit, offset) = normalize_page(limit, offset);
        self.store
            .list(limit, offset)
            .await
            .map_err(ServiceError::storage("list users"))
    }
}

fn not_found_or(context: &'static str) -> impl Fn(StoreError) -> ServiceError {
    move |e| match e {
        StoreError::NotFound => ServiceError::NotFound("user not found".into()),
        other => ServiceError::Storage {
            context,
            source: other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{jwt::test_issuer, password::test_hasher},
        users::memory::MemoryUserStore,
    };
    use async_trait::async_trait;

    fn service_with(store: Arc<dyn UserStore>) -> UserService {
        UserService::new(store, test_hasher(), test_issuer("access-secret", "refresh-secret"))
    }

    fn service() -> (UserService, Arc<MemoryUserStore>) {
        let store = Arc::new(MemoryUserStore::new());
        (service_with(store.clone()), store)
    }

    async fn create(svc: &UserService, email: &str) -> User {
        svc.create_account("Ana", email, "+5511987654321", "s3cret-pass")
            .await
            .expect("create account")
    }

    #[tokio::test]
    async fn create_account_returns_stored_user() {
        let (svc, store) = service();
        let user = create(&svc, "Ana@Example.com ").await;

        assert_eq!(user.id.len(), ids::ID_LEN);
        assert!(user
            .id
            .chars()
            .all(|c| ids::SORTABLE_SYMBOLS.contains(c)));
        assert_eq!(user.email, "ana@example.com");
        assert_ne!(user.password_hash, "s3cret-pass");
        assert_eq!(user.created_at, user.updated_at);
        assert_eq!(store.len().await, 1);

        let stored = svc.get_user(&user.id).await.unwrap();
        assert_eq!(stored.email, user.email);
    }

    #[tokio::test]
    async fn create_account_validates_fields() {
        let (svc, store) = service();
        let cases = [
            ("", "a@x.com", "+12025550123", "pw"),
            ("Ana", "", "+12025550123", "pw"),
            ("Ana", "a@x.com", "", "pw"),
            ("Ana", "a@x.com", "+12025550123", ""),
            ("Ana", "not-an-email", "+12025550123", "pw"),
            ("Ana", "a@x.com", "+155512345678", "pw"),
            ("Ana", "a@x.com", "12025550123", "pw"),
        ];
        for (name, email, phone, password) in cases {
            let err = svc
                .create_account(name, email, phone, password)
                .await
                .unwrap_err();
            assert!(
                matches!(err, ServiceError::Validation(_)),
                "{name:?} {email:?} {phone:?}: {err:?}"
            );
        }
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn authenticate_issues_distinct_tokens() {
        let (svc, _) = service();
        let user = create(&svc, "a@x.com").await;

        let pair = svc.authenticate("a@x.com", "s3cret-pass").await.unwrap();
        let issuer = test_issuer("access-secret", "refresh-secret");
        let access = issuer.verify_access(&pair.access_token).unwrap();
        let refresh = issuer.verify_refresh(&pair.refresh_token).unwrap();

        assert_eq!(access.sub, user.id);
        assert_eq!(refresh.sub, user.id);
        assert!(refresh.exp > access.exp);
        assert_ne!(pair.access_token, pair.refresh_token);
    }

    #[tokio::test]
    async fn authenticate_failures_are_indistinguishable() {
        let (svc, _) = service();
        create(&svc, "a@x.com").await;

        let wrong_password = svc.authenticate("a@x.com", "nope").await.unwrap_err();
        let unknown_email = svc.authenticate("b@x.com", "s3cret-pass").await.unwrap_err();
        assert!(matches!(wrong_password, ServiceError::InvalidCredentials));
        assert!(matches!(unknown_email, ServiceError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());

        let empty = svc.authenticate("a@x.com", "").await.unwrap_err();
        assert!(matches!(empty, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn authenticate_surfaces_missing_secret() {
        let store = Arc::new(MemoryUserStore::new());
        let issuer = TokenIssuer::new(&crate::config::JwtConfig {
            access_secret: None,
            refresh_secret: Some("refresh".into()),
            access_ttl_minutes: 15,
            refresh_ttl_minutes: 60,
        });
        let svc = UserService::new(store, test_hasher(), issuer);
        create(&svc, "a@x.com").await;

        let err = svc.authenticate("a@x.com", "s3cret-pass").await.unwrap_err();
        assert!(matches!(err, ServiceError::Signing(_)));

        let unsigned = UserService::new(
            Arc::new(MemoryUserStore::new()),
            test_hasher(),
            TokenIssuer::new(&crate::config::JwtConfig {
                access_secret: Some("access".into()),
                refresh_secret: None,
                access_ttl_minutes: 15,
                refresh_ttl_minutes: 60,
            }),
        );
        let err = unsigned.refresh("a.b.c").await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Signing(TokenError::MissingSecret { kind: "refresh" })
        ));
    }

    #[tokio::test]
    async fn refresh_trades_for_new_pair() {
        let (svc, _) = service();
        let user = create(&svc, "a@x.com").await;
        let pair = svc.authenticate("a@x.com", "s3cret-pass").await.unwrap();

        let renewed = svc.refresh(&pair.refresh_token).await.unwrap();
        let issuer = test_issuer("access-secret", "refresh-secret");
        assert_eq!(issuer.verify_access(&renewed.access_token).unwrap().sub, user.id);

        let err = svc.refresh(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidToken));

        svc.delete_user(&user.id).await.unwrap();
        let err = svc.refresh(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidToken));
    }

    #[tokio::test]
    async fn duplicate_emails_conflict_on_create_and_update() {
        let (svc, _) = service();
        let a = create(&svc, "a@x.com").await;
        let c = create(&svc, "c@x.com").await;

        let err = svc
            .create_account("Bob", "a@x.com", "+12025550123", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let err = svc.update_user(&a.id, "", &c.email, "").await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let updated = svc.update_user(&a.id, "", "free@x.com", "").await.unwrap();
        assert_eq!(updated.email, "free@x.com");
        assert!(updated.updated_at > updated.created_at);
        assert_eq!(updated.created_at, a.created_at);
        assert_eq!(updated.name, a.name);
    }

    #[tokio::test]
    async fn update_keeps_own_email_and_validates_phone() {
        let (svc, _) = service();
        let a = create(&svc, "a@x.com").await;

        let same = svc
            .update_user(&a.id, "Ana Maria", "A@X.com", "+12025550123")
            .await
            .unwrap();
        assert_eq!(same.name, "Ana Maria");
        assert_eq!(same.email, "a@x.com");
        assert_eq!(same.phone, "+12025550123");

        let err = svc.update_user(&a.id, "", "", "555-0123").await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn missing_users_are_not_found() {
        let (svc, _) = service();
        assert!(matches!(
            svc.get_user("nope").await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
        assert!(matches!(
            svc.update_user("nope", "x", "", "").await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
        assert!(matches!(
            svc.delete_user("nope").await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
        assert!(matches!(
            svc.delete_user("").await.unwrap_err(),
            ServiceError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn delete_removes_user() {
        let (svc, store) = service();
        let a = create(&svc, "a@x.com").await;
        svc.delete_user(&a.id).await.unwrap();
        assert_eq!(store.len().await, 0);
        assert!(svc.get_user(&a.id).await.is_err());
    }

    #[test]
    fn page_normalization() {
        assert_eq!(normalize_page(0, -5), (10, 0));
        assert_eq!(normalize_page(-3, 7), (10, 7));
        assert_eq!(normalize_page(25, 0), (25, 0));
        assert_eq!(normalize_page(10_000, 3), (MAX_PAGE_LIMIT, 3));
    }

    #[tokio::test]
    async fn list_users_newest_first() {
        let (svc, _) = service();
        for i in 0..12 {
            create(&svc, &format!("user{i}@x.com")).await;
        }

        let page = svc.list_users(0, -5).await.unwrap();
        assert_eq!(page.len(), 10);
        assert_eq!(page[0].email, "user11@x.com");
        assert!(page.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let rest = svc.list_users(10, 10).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[1].email, "user0@x.com");
    }

    /// Passes the advisory email check, then loses the insert race.
    struct RacingStore(MemoryUserStore);

    #[async_trait]
    impl UserStore for RacingStore {
        async fn create(&self, _user: &User) -> Result<(), StoreError> {
            Err(StoreError::DuplicateKey)
        }
        async fn get_by_id(&self, id: &str) -> Result<User, StoreError> {
            self.0.get_by_id(id).await
        }
        async fn get_by_email(&self, _email: &str) -> Result<User, StoreError> {
            Err(StoreError::NotFound)
        }
        async fn update(&self, user: &User) -> Result<(), StoreError> {
            self.0.update(user).await
        }
        async fn delete(&self, id: &str) -> Result<(), StoreError> {
            self.0.delete(id).await
        }
        async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>, StoreError> {
            self.0.list(limit, offset).await
        }
    }

    #[tokio::test]
    async fn store_duplicate_key_maps_to_conflict() {
        let svc = service_with(Arc::new(RacingStore(MemoryUserStore::new())));
        let err = svc
            .create_account("Ana", "a@x.com", "+12025550123", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }
}
