use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;
pub mod ids;
#[cfg(test)]
pub mod memory;
pub mod phone;
pub mod repo;
pub mod repo_types;
pub mod services;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::user_routes())
        .merge(handlers::me_routes())
}
