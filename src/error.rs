use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::keys::policy::ViolatedLimit;

/// Why a presented gateway key failed authentication. Internal only: every
/// variant renders as the same external "unauthorized".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    UnknownKey,
    SecretMismatch,
    Malformed,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailure::UnknownKey => "unknown_key",
            AuthFailure::SecretMismatch => "secret_mismatch",
            AuthFailure::Malformed => "malformed",
        }
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("integrity check failed")]
    Integrity,
    #[error("master key version {0} is not available")]
    KeyNotFound(i32),
    #[error("unauthorized")]
    Unauthorized(AuthFailure),
    #[error("key is not active")]
    KeyInactive,
    #[error("limit exceeded: {0}")]
    LimitExceeded(ViolatedLimit),
    #[error("confirmation does not match key name")]
    ConfirmationMismatch,
    #[error("duplicate key")]
    DuplicateSecret,
    #[error("not found")]
    NotFound,
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl CredentialError {
    /// Stable reason code for internal logs and audit payloads.
    pub fn reason_code(&self) -> &'static str {
        match self {
            CredentialError::Configuration(_) => "configuration",
            CredentialError::InvalidInput(_) => "invalid_input",
            CredentialError::Integrity => "integrity",
            CredentialError::KeyNotFound(_) => "key_not_found",
            CredentialError::Unauthorized(failure) => failure.as_str(),
            CredentialError::KeyInactive => "key_inactive",
            CredentialError::LimitExceeded(_) => "limit_exceeded",
            CredentialError::ConfirmationMismatch => "confirmation_mismatch",
            CredentialError::DuplicateSecret => "duplicate_secret",
            CredentialError::NotFound => "not_found",
            CredentialError::Storage(_) => "storage",
        }
    }
}

pub type CredentialResult<T> = Result<T, CredentialError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error")]
    Internal,
}

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".into()),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into()),
            AppError::Credential(err) => match err {
                CredentialError::Unauthorized(_) | CredentialError::KeyInactive => {
                    (StatusCode::UNAUTHORIZED, "unauthorized".into())
                }
                CredentialError::LimitExceeded(_) => {
                    (StatusCode::TOO_MANY_REQUESTS, "rate limited".into())
                }
                CredentialError::InvalidInput(message) => {
                    (StatusCode::BAD_REQUEST, message.clone())
                }
                CredentialError::ConfirmationMismatch => (
                    StatusCode::CONFLICT,
                    "confirmation does not match key name".into(),
                ),
                CredentialError::DuplicateSecret => (StatusCode::CONFLICT, "duplicate key".into()),
                CredentialError::NotFound => (StatusCode::NOT_FOUND, "not found".into()),
                CredentialError::Configuration(_)
                | CredentialError::Integrity
                | CredentialError::KeyNotFound(_)
                | CredentialError::Storage(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".into(),
                ),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::debug!(reason = %self, "request rejected");
        }
        (status, message).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
