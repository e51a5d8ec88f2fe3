//! Application-wide error types.
//!
//! The lifecycle variants (`NotFound` .. `Inconsistent`) are the outcomes a
//! caller can observe; the remaining variants wrap infrastructure failures
//! and are reported without internal detail.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::auth::DenyReason;
use crate::signature::SignatureError;

/// Which state guard rejected a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateConflict {
    ProjectClosed,
    ProjectOpen,
    AlreadyMerged,
}

impl std::fmt::Display for StateConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProjectClosed => f.write_str("project is closed"),
            Self::ProjectOpen => f.write_str("project is already open"),
            Self::AlreadyMerged => f.write_str("submission is already merged"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("unauthorized: {0}")]
    Unauthorized(DenyReason),

    #[error("forbidden: {0}")]
    Forbidden(DenyReason),

    #[error("invalid state: {0}")]
    InvalidState(StateConflict),

    #[error("award dispatch failed: {0}")]
    DispatchFailure(String),

    /// The dispatcher did not answer in time; the award may or may not have
    /// been granted.
    #[error("award dispatch outcome unknown: {0}")]
    DispatchUnknown(String),

    /// An award was granted but the merge could not be recorded.
    #[error("inconsistent state after award: {0}")]
    Inconsistent(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Short machine-readable class name used in response bodies.
    pub fn class(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Unauthorized(_) | Self::Signature(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidState(_) => "invalid_state",
            Self::DispatchFailure(_) => "dispatch_failure",
            Self::DispatchUnknown(_) => "dispatch_unknown",
            Self::Inconsistent(_) => "inconsistent",
            Self::Validation(_) => "validation",
            Self::Database(_)
            | Self::Migrate(_)
            | Self::Json(_)
            | Self::Config(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) | Self::Signature(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidState(_) => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::DispatchFailure(_) => StatusCode::BAD_GATEWAY,
            Self::DispatchUnknown(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Inconsistent(_)
            | Self::Database(_)
            | Self::Migrate(_)
            | Self::Json(_)
            | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Caller-facing reason. Infrastructure failures are not described.
    fn public_reason(&self) -> String {
        match self {
            Self::Database(_) | Self::Migrate(_) | Self::Json(_) | Self::Config(_) => {
                "internal server error".to_string()
            }
            Self::Inconsistent(_) => {
                "award was granted but could not be recorded; operator notified".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: &'static str,
    pub reason: String,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {self}");
        }
        let body = ErrorResponse {
            success: false,
            error: self.class(),
            reason: self.public_reason(),
        };
        (status, Json(body)).into_response()
    }
}
