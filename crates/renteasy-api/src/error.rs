use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use renteasy_auth::password::PasswordError;
use renteasy_auth::TokenError;
use renteasy_db::StoreError;

/// Every REST failure. Rendered as `{"error": "<code>"}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid request")]
    InvalidRequest,

    #[error("email already registered")]
    EmailTaken,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("refresh token cookie missing")]
    RefreshTokenMissing,

    #[error("refresh token rejected")]
    InvalidRefreshToken,

    #[error("missing authorization header")]
    MissingAuthorization,

    #[error("malformed authorization header")]
    InvalidAuthorization,

    #[error("access token rejected: {0}")]
    InvalidToken(TokenError),

    #[error("invalid property id")]
    InvalidPropertyId,

    #[error("invalid conversation id")]
    InvalidConversationId,

    #[error("property not found")]
    PropertyNotFound,

    #[error("cannot start a conversation about your own property")]
    OwnProperty,

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("not a participant of this conversation")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Password(#[from] PasswordError),

    #[error("token error: {0}")]
    Token(TokenError),

    #[error("failed to build cookie: {0}")]
    Cookie(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest
            | Self::InvalidPropertyId
            | Self::InvalidConversationId
            | Self::OwnProperty => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials
            | Self::RefreshTokenMissing
            | Self::InvalidRefreshToken
            | Self::MissingAuthorization
            | Self::InvalidAuthorization
            | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::PropertyNotFound | Self::ConversationNotFound | Self::NotFound => {
                StatusCode::NOT_FOUND
            }
            Self::EmailTaken => StatusCode::CONFLICT,
            Self::Store(_)
            | Self::Password(_)
            | Self::Token(_)
            | Self::Cookie(_)
            | Self::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::EmailTaken => "email_taken",
            Self::InvalidCredentials => "invalid_credentials",
            Self::RefreshTokenMissing => "refresh_token_missing",
            Self::InvalidRefreshToken => "invalid_refresh_token",
            Self::MissingAuthorization => "missing_authorization",
            Self::InvalidAuthorization => "invalid_authorization",
            Self::InvalidToken(TokenError::Expired) => "token_expired",
            Self::InvalidToken(_) => "invalid_token",
            Self::InvalidPropertyId => "invalid_property_id",
            Self::InvalidConversationId => "invalid_conversation_id",
            Self::PropertyNotFound => "property_not_found",
            Self::OwnProperty => "own_property",
            Self::ConversationNotFound => "conversation_not_found",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Store(_) => "db_error",
            Self::Password(_) => "hash_error",
            Self::Token(_) => "token_error",
            Self::Cookie(_) => "cookie_error",
            Self::Join(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.code() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_token_has_its_own_code() {
        let err = ApiError::InvalidToken(TokenError::Expired);
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.code(), "token_expired");
        assert_eq!(ApiError::InvalidToken(TokenError::WrongAudience).code(), "invalid_token");
    }

    #[test]
    fn storage_failures_are_500() {
        let err = ApiError::from(StoreError::LockPoisoned);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "db_error");
    }
}
