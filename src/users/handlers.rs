use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::WithRejection;
use tracing::instrument;

use super::dto::{CreateUserRequest, Pagination, PublicUser, UpdateUserRequest};
use crate::{auth::jwt::AuthUser, error::ServiceError, state::AppState};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user).get(list_users))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<CreateUserRequest>, ServiceError>,
) -> Result<(StatusCode, Json<PublicUser>), ServiceError> {
    let user = state
        .users
        .create_account(&payload.name, &payload.email, &payload.phone, &payload.password)
        .await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    WithRejection(Query(p), _): WithRejection<Query<Pagination>, ServiceError>,
) -> Result<Json<Vec<PublicUser>>, ServiceError> {
    let users = state.users.list_users(p.limit, p.offset).await?;
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<PublicUser>, ServiceError> {
    let user = state.users.get_user(&id).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<String>,
    WithRejection(Json(payload), _): WithRejection<Json<UpdateUserRequest>, ServiceError>,
) -> Result<Json<PublicUser>, ServiceError> {
    let user = state
        .users
        .update_user(&id, &payload.name, &payload.email, &payload.phone)
        .await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ServiceError> {
    state.users.delete_user(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, ServiceError> {
    let user = state.users.get_user(&user_id).await?;
    Ok(Json(user.into()))
}
