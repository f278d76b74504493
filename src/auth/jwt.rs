use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use super::claims::{AccessClaims, RefreshClaims, TokenType};
use crate::{config::JwtConfig, error::ServiceError, state::AppState};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("{kind} token signing secret is not configured")]
    MissingSecret { kind: &'static str },
    #[error("failed to sign {kind} token: {source}")]
    Sign {
        kind: &'static str,
        #[source]
        source: jsonwebtoken::errors::Error,
    },
    #[error("{kind} token lifetime puts expiry out of range")]
    Expiry { kind: &'static str },
    #[error("invalid {kind} token: {source}")]
    Invalid {
        kind: &'static str,
        #[source]
        source: jsonwebtoken::errors::Error,
    },
}

#[derive(Clone)]
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: Option<&str>) -> Option<Self> {
        secret.map(|s| Self {
            encoding: EncodingKey::from_secret(s.as_bytes()),
            decoding: DecodingKey::from_secret(s.as_bytes()),
        })
    }
}

/// Signs and checks access and refresh tokens. Each kind has its own secret
/// and lifetime; a missing secret only fails when that kind is used.
#[derive(Clone)]
pub struct TokenIssuer {
    access: Option<KeyPair>,
    refresh: Option<KeyPair>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

/// Both halves of a successful login.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl FromRef<AppState> for TokenIssuer {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn label(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

impl TokenIssuer {
    pub fn new(cfg: &JwtConfig) -> Self {
        if cfg.access_secret.is_none() {
            warn!("JWT_ACCESS_SECRET is not set; logins will fail");
        }
        if cfg.refresh_secret.is_none() {
            warn!("JWT_REFRESH_SECRET is not set; logins will fail");
        }
        if cfg.access_secret.is_some() && cfg.access_secret == cfg.refresh_secret {
            warn!("access and refresh tokens share one signing secret");
        }
        Self {
            access: KeyPair::from_secret(cfg.access_secret.as_deref()),
            refresh: KeyPair::from_secret(cfg.refresh_secret.as_deref()),
            access_ttl: Duration::seconds(cfg.access_ttl_minutes.saturating_mul(60)),
            refresh_ttl: Duration::seconds(cfg.refresh_ttl_minutes.saturating_mul(60)),
        }
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    fn keys(&self, kind: TokenKind) -> Result<&KeyPair, TokenError> {
        let keys = match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        };
        keys.as_ref()
            .ok_or(TokenError::MissingSecret { kind: kind.label() })
    }

    fn expiry(kind: TokenKind, now: OffsetDateTime, ttl: Duration) -> Result<i64, TokenError> {
        now.checked_add(ttl)
            .map(OffsetDateTime::unix_timestamp)
            .ok_or(TokenError::Expiry { kind: kind.label() })
    }

    pub fn issue_access(&self, user_id: &str) -> Result<String, TokenError> {
        let kind = TokenKind::Access;
        let keys = self.keys(kind)?;
        let now = OffsetDateTime::now_utc();
        let claims = AccessClaims {
            sub: user_id.to_string(),
            iat: now.unix_timestamp(),
            exp: Self::expiry(kind, now, self.access_ttl)?,
        };
        let token = encode(&Header::default(), &claims, &keys.encoding).map_err(|source| {
            TokenError::Sign {
                kind: kind.label(),
                source,
            }
        })?;
        debug!(user_id = %user_id, "access token signed");
        Ok(token)
    }

    pub fn issue_refresh(&self, user_id: &str) -> Result<String, TokenError> {
        let kind = TokenKind::Refresh;
        let keys = self.keys(kind)?;
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            exp: Self::expiry(kind, OffsetDateTime::now_utc(), self.refresh_ttl)?,
            token_type: TokenType::Refresh,
        };
        let token = encode(&Header::default(), &claims, &keys.encoding).map_err(|source| {
            TokenError::Sign {
                kind: kind.label(),
                source,
            }
        })?;
        debug!(user_id = %user_id, "refresh token signed");
        Ok(token)
    }

    pub fn issue_pair(&self, user_id: &str) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue_access(user_id)?,
            refresh_token: self.issue_refresh(user_id)?,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let kind = TokenKind::Access;
        let keys = self.keys(kind)?;
        let data = decode::<AccessClaims>(token, &keys.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|source| TokenError::Invalid {
                kind: kind.label(),
                source,
            })?;
        Ok(data.claims)
    }

    /// Refresh tokens decode only with the refresh secret and must carry
    /// `type = "refresh"`.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let kind = TokenKind::Refresh;
        let keys = self.keys(kind)?;
        let data = decode::<RefreshClaims>(token, &keys.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|source| TokenError::Invalid {
                kind: kind.label(),
                source,
            })?;
        Ok(data.claims)
    }
}

/// Bearer access token extractor, yields the user ID.
pub struct AuthUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenIssuer: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let tokens = TokenIssuer::from_ref(state);
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ServiceError::MissingToken)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
            .ok_or(ServiceError::MissingToken)?;

        match tokens.verify_access(token) {
            Ok(claims) => Ok(AuthUser(claims.sub)),
            // A server without an access secret cannot judge the token.
            Err(e @ TokenError::MissingSecret { .. }) => Err(ServiceError::Signing(e)),
            Err(e) => {
                warn!(error = %e, "invalid or expired access token");
                Err(ServiceError::InvalidToken)
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_issuer(access: &str, refresh: &str) -> TokenIssuer {
    TokenIssuer::new(&JwtConfig {
        access_secret: Some(access.into()),
        refresh_secret: Some(refresh.into()),
        access_ttl_minutes: 15,
        refresh_ttl_minutes: 60 * 24 * 7,
    })
}
