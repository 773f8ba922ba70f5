use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// First field that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid name")]
    Name,
    #[error("Invalid url")]
    Url,
    #[error("Invalid description")]
    Description,
    #[error("Invalid contact")]
    Contact,
    #[error("Invalid tags")]
    Tags,
    #[error("Invalid disciplines")]
    Disciplines,
    #[error("Captcha failed")]
    Captcha,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::Name => "invalid_name",
            ValidationError::Url => "invalid_url",
            ValidationError::Description => "invalid_description",
            ValidationError::Contact => "invalid_contact",
            ValidationError::Tags => "invalid_tags",
            ValidationError::Disciplines => "invalid_disciplines",
            ValidationError::Captcha => "captcha_failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {0} already exists")]
    DuplicateId(String),
    #[error("record {0} not found")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("upstream {context} returned {status}")]
    Upstream { context: String, status: u16 },
    #[error("stored record {0} could not be decoded")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("{message}")]
    BadRequest {
        code: &'static str,
        message: &'static str,
    },
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden origin")]
    ForbiddenOrigin,
    #[error("Not found")]
    NotFound,
    #[error("Method Not Allowed")]
    MethodNotAllowed,
    #[error("Too Many Requests")]
    RateLimited,
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Validation(v) => (StatusCode::BAD_REQUEST, v.code(), v.to_string()),
            AppError::InvalidJson => (
                StatusCode::BAD_REQUEST,
                "invalid_json",
                "Invalid JSON".to_string(),
            ),
            AppError::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, *code, message.to_string())
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Unauthorized".to_string(),
            ),
            AppError::ForbiddenOrigin => (
                StatusCode::FORBIDDEN,
                "forbidden_origin",
                "Forbidden origin".to_string(),
            ),
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found", "Not found".to_string()),
            AppError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                "method_not_allowed",
                "Method Not Allowed".to_string(),
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too Many Requests".to_string(),
            ),
            AppError::Upstream(_) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "Upstream service failed".to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal Error".to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Details stay in the logs.
        match &self {
            AppError::Upstream(detail) => error!("Upstream failure: {}", detail),
            AppError::Internal(detail) => error!("Internal error: {}", detail),
            _ => {}
        }
        let (status, code, message) = self.parts();
        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => AppError::NotFound,
            StoreError::Upstream { .. } => AppError::Upstream(e.to_string()),
            StoreError::DuplicateId(_) | StoreError::Unavailable(_) | StoreError::Corrupt(_) => {
                AppError::Internal(e.to_string())
            }
        }
    }
}
