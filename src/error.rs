//! Error types for boardsync
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, invalid payload, unknown entity)
//! - 4: Operation failed (remote store, disk, lock contention)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the boardsync CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const OPERATION_FAILED: i32 = 4;
}

/// A payload that failed schema checks before any write was attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Structured failure reported by the remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("remote rejected write ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("record already exists in {table}: {id}")]
    Conflict { table: String, id: String },
}

/// Main error type for boardsync operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    // Operation failures (exit code 4)
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::Validation(_)
            | Error::NotFound { .. } => exit_codes::USER_ERROR,

            // Operation failures
            Error::Remote(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// True for errors caused by the request itself rather than by the
    /// store or transport; retrying or queueing them cannot help.
    pub fn is_user_error(&self) -> bool {
        self.exit_code() == exit_codes::USER_ERROR
    }

    /// Extra machine-readable context for JSON error output
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::Validation(err) => Some(serde_json::json!({
                "field": err.field,
                "message": err.message,
            })),
            Error::NotFound { entity, id } => Some(serde_json::json!({
                "entity": entity,
                "id": id,
            })),
            Error::Remote(RemoteError::Rejected { code, .. }) => {
                Some(serde_json::json!({ "remote_code": code }))
            }
            _ => None,
        }
    }
}

/// Result type alias for boardsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
