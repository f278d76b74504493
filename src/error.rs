//! Service error type and its HTTP mapping.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::{
    auth::{jwt::TokenError, password::HashingError},
    users::{ids::GenerationError, repo::StoreError},
};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("authentication required")]
    MissingToken,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error(transparent)]
    Hashing(#[from] HashingError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Signing(#[from] TokenError),

    #[error("{context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

// Extractor rejections become 400s with the usual `{"error"}` body.
impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(format!("invalid request body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ServiceError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(format!("invalid query string: {}", rejection.body_text()))
    }
}

impl ServiceError {
    pub fn storage(context: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Storage { context, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidCredentials | Self::MissingToken | Self::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            Self::Hashing(_) | Self::Generation(_) | Self::Signing(_) | Self::Storage { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self, "internal error");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
