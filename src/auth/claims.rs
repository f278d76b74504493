use serde::{Deserialize, Serialize};

/// Discriminator stamped on refresh tokens only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Refresh,
}

/// Access token payload. Unknown claims are refused, so a refresh token
/// never decodes as an access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AccessClaims {
    pub sub: String, // user ID
    pub iat: i64,    // issued at (unix timestamp)
    pub exp: i64,    // expires at (unix timestamp)
}

/// Refresh token payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshClaims {
    pub sub: String,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}
