use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(&'static str),

    /// Also used when the caller lacks the relation needed to see the entity,
    /// so existence never leaks to non-participants.
    #[error("not found: {0}")]
    NotFound(&'static str),

    /// Lost a creation race against a concurrent writer. Recovered by the caller.
    #[error("conflicting write")]
    Conflict,

    #[error("server misconfigured: {0}")]
    Misconfigured(&'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        use AppError::*;
        match self {
            Unauthorized => StatusCode::UNAUTHORIZED,
            BadRequest(_) => StatusCode::BAD_REQUEST,
            NotFound(_) => StatusCode::NOT_FOUND,
            Conflict | Misconfigured(_) | Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// What the caller gets to see. Internal causes stay in the logs.
    pub fn public_message(&self) -> &'static str {
        use AppError::*;
        match self {
            Unauthorized => "Unauthorized",
            BadRequest(msg) | NotFound(msg) => *msg,
            Misconfigured(_) => "Server misconfigured",
            Conflict | Internal(_) => "Internal Server Error",
        }
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self::Internal(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(serde_json::Error);
apperr_impl!(sqlx::Error);
apperr_impl!(tower_sessions::session::Error);
apperr_impl!(jsonwebtoken::errors::Error);

/// An [`AppError`] that reached the request boundary, tagged with the
/// operation it came from.
#[derive(Debug)]
pub struct ApiError {
    pub op: &'static str,
    pub error: AppError,
}

pub type ApiResult<T> = Result<T, ApiError>;

pub trait Tag<T> {
    fn tag(self, op: &'static str) -> ApiResult<T>;
}

impl<T, E> Tag<T> for Result<T, E>
where
    E: Into<AppError>,
{
    fn tag(self, op: &'static str) -> ApiResult<T> {
        self.map_err(|err| ApiError { op, error: err.into() })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError { op, error } = self;
        match &error {
            AppError::Internal(cause) => tracing::error!(op, error = ?cause, "request failed"),
            AppError::Conflict | AppError::Misconfigured(_) => tracing::error!(op, %error, "request failed"),
            _ => tracing::warn!(op, %error, "request rejected"),
        }

        (
            error.status(),
            Json(json!({ "error": error.public_message() })),
        )
            .into_response()
    }
}
