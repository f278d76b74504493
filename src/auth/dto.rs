use serde::{Deserialize, Serialize};

/// Request body for login.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body returned by login and refresh. The refresh token travels in a
/// cookie instead.
#[derive(Serialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
}
