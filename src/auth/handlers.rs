use axum::{extract::State, routing::post, Json, Router};
use axum_extra::extract::{
    cookie::{Cookie, CookieJar, SameSite},
    WithRejection,
};
use time::Duration;
use tracing::instrument;

use super::{
    dto::{AccessTokenResponse, LoginRequest},
    jwt::TokenPair,
};
use crate::{error::ServiceError, state::AppState};

pub const REFRESH_COOKIE: &str = "jid";
pub const REFRESH_COOKIE_PATH: &str = "/api/auth/refresh";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
}

/// Only sent back to the refresh endpoint, never readable from scripts.
fn refresh_cookie(token: String, max_age: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, token))
        .path(REFRESH_COOKIE_PATH)
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .max_age(max_age)
        .build()
}

fn respond(
    state: &AppState,
    jar: CookieJar,
    pair: TokenPair,
) -> (CookieJar, Json<AccessTokenResponse>) {
    let cookie = refresh_cookie(
        pair.refresh_token,
        state.tokens.refresh_ttl(),
        state.config.is_production(),
    );
    (
        jar.add(cookie),
        Json(AccessTokenResponse {
            access_token: pair.access_token,
        }),
    )
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(payload), _): WithRejection<Json<LoginRequest>, ServiceError>,
) -> Result<(CookieJar, Json<AccessTokenResponse>), ServiceError> {
    let pair = state
        .users
        .authenticate(&payload.email, &payload.password)
        .await?;
    Ok(respond(&state, jar, pair))
}

#[instrument(skip(state, jar))]
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<AccessTokenResponse>), ServiceError> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(ServiceError::MissingToken)?;
    let pair = state.users.refresh(&token).await?;
    Ok(respond(&state, jar, pair))
}
