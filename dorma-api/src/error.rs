use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dorma_domain::BookingError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    PolicyError(String),
    NotFoundError(String),
    ConflictError(String),
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::PolicyError(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::RoomUnavailable => AppError::ConflictError(err.to_string()),
            BookingError::PolicyViolation { .. } => AppError::PolicyError(err.to_string()),
            BookingError::NotPermitted => AppError::AuthorizationError(err.to_string()),
            BookingError::NotFound => AppError::NotFoundError(err.to_string()),
            BookingError::InvalidTransition { .. } => AppError::ConflictError(err.to_string()),
            BookingError::InvalidTerms(_) | BookingError::NotFlagged => {
                AppError::ValidationError(err.to_string())
            }
            BookingError::Provider(msg) => AppError::InternalServerError(msg),
            BookingError::Store(e) => AppError::InternalServerError(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}
