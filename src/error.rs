//! Error taxonomy (kinds, not exhaustive variants per failure site),
//! grounded on `auth/middleware.rs::AuthError`'s `IntoResponse` pattern.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("client error: {0}")]
    Client(String),

    #[error("unknown exchange: {0}")]
    UnknownExchange(String),

    #[error("unsupported interval: {0}")]
    UnsupportedInterval(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("invalid date range")]
    InvalidRange,

    #[error("duplicate order_id: {0}")]
    DuplicateOrderId(String),

    #[error("missing authorization token")]
    MissingToken,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("revoked token")]
    RevokedToken,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("username already taken")]
    UsernameTaken,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error ({correlation_id}): {detail}")]
    Internal {
        correlation_id: Uuid,
        detail: String,
    },
}

impl GatewayError {
    pub fn internal(detail: impl Into<String>) -> Self {
        let correlation_id = Uuid::new_v4();
        let detail = detail.into();
        tracing::error!(%correlation_id, %detail, "internal error");
        GatewayError::Internal {
            correlation_id,
            detail,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            GatewayError::Client(m) => (StatusCode::BAD_REQUEST, "client_error", m.clone()),
            GatewayError::UnknownExchange(m) => {
                (StatusCode::NOT_FOUND, "unknown_exchange", m.clone())
            }
            GatewayError::UnsupportedInterval(m) => (
                StatusCode::BAD_REQUEST,
                "unsupported_interval",
                m.clone(),
            ),
            GatewayError::InvalidSymbol(m) => {
                (StatusCode::BAD_REQUEST, "invalid_symbol", m.clone())
            }
            GatewayError::InvalidRange => (
                StatusCode::BAD_REQUEST,
                "invalid_range",
                "invalid date range".to_string(),
            ),
            GatewayError::DuplicateOrderId(m) => (
                StatusCode::BAD_REQUEST,
                "duplicate_order_id",
                m.clone(),
            ),
            GatewayError::MissingToken => (
                StatusCode::UNAUTHORIZED,
                "missing_token",
                "missing authorization token".to_string(),
            ),
            GatewayError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "invalid_token",
                "invalid or expired token".to_string(),
            ),
            GatewayError::RevokedToken => (
                StatusCode::UNAUTHORIZED,
                "revoked_token",
                "token has been revoked".to_string(),
            ),
            GatewayError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                "invalid username or password".to_string(),
            ),
            GatewayError::UsernameTaken => (
                StatusCode::BAD_REQUEST,
                "username_taken",
                "username already taken".to_string(),
            ),
            GatewayError::Forbidden => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "insufficient permissions".to_string(),
            ),
            GatewayError::NotFound => (
                StatusCode::NOT_FOUND,
                "not_found",
                "not found".to_string(),
            ),
            GatewayError::Upstream(m) => (StatusCode::BAD_GATEWAY, "upstream_error", m.clone()),
            GatewayError::Internal { correlation_id, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("internal error, correlation_id={correlation_id}"),
            ),
        };

        (status, Json(json!({ "error": kind, "message": message }))).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
