//! Error types for Deskline.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 3=not_found, 4=validation, 6=sync, etc.)
//! - Retryability flags
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

use crate::model::Collection;

/// Result type alias for Deskline operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    AlreadyInitialized,
    DatabaseError,

    // Not Found (exit 3)
    RecordNotFound,

    // Validation (exit 4)
    InvalidArgument,
    InvalidDocument,
    UserExists,
    InvalidCredentials,
    PermissionDenied,

    // Sync (exit 6)
    RemoteError,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::RecordNotFound => "RECORD_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::InvalidDocument => "INVALID_DOCUMENT",
            Self::UserExists => "USER_EXISTS",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::RemoteError => "REMOTE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized | Self::AlreadyInitialized | Self::DatabaseError => 2,
            Self::RecordNotFound => 3,
            Self::InvalidArgument
            | Self::InvalidDocument
            | Self::UserExists
            | Self::InvalidCredentials
            | Self::PermissionDenied => 4,
            Self::RemoteError => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether the same call may succeed if retried.
    ///
    /// True for remote failures (the network may come back) and database
    /// busy errors. False for validation and not-found errors.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteError | Self::DatabaseError)
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in Deskline operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `deskline init` first")]
    NotInitialized,

    #[error("Already initialized at {path}")]
    AlreadyInitialized { path: PathBuf },

    #[error("{collection} record not found: {key}")]
    RecordNotFound { collection: Collection, key: String },

    #[error("User already exists: {name}")]
    UserExists { name: String },

    #[error("Invalid user name or PIN")]
    InvalidCredentials,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid {collection} document {key}: {message}")]
    InvalidDocument {
        collection: Collection,
        key: String,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a not-found error on `collection`.
    #[must_use]
    pub fn not_found(collection: Collection, key: impl ToString) -> Self {
        Self::RecordNotFound {
            collection,
            key: key.to_string(),
        }
    }

    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::RecordNotFound { .. } => ErrorCode::RecordNotFound,
            Self::UserExists { .. } => ErrorCode::UserExists,
            Self::InvalidCredentials => ErrorCode::InvalidCredentials,
            Self::PermissionDenied(_) => ErrorCode::PermissionDenied,
            Self::InvalidDocument { .. } => ErrorCode::InvalidDocument,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Http(_) | Self::Remote(_) => ErrorCode::RemoteError,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => {
                Some("Run `deskline init` to create the local database".to_string())
            }

            Self::AlreadyInitialized { path } => Some(format!(
                "Database already exists at {}. Use `--force` to reinitialize.",
                path.display()
            )),

            Self::RecordNotFound { collection, key } => Some(format!(
                "No {collection} record with ID '{key}'. Use `deskline {} list` to see what exists.",
                collection.command_name()
            )),

            Self::UserExists { name } => Some(format!(
                "User names are case-insensitive; '{name}' is taken. Pick another name."
            )),

            Self::InvalidCredentials => {
                Some("Check the user name (case-insensitive) and PIN.".to_string())
            }

            Self::PermissionDenied(_) => {
                Some("Run the command as an admin user (`--as <admin>`).".to_string())
            }

            Self::InvalidArgument(msg) => {
                if msg.contains("status") {
                    Some(
                        "Valid statuses: pending, completed (tasks); Open, Closed (tickets). \
                         Synonyms: done→completed/Closed, todo→pending/Open"
                            .to_string(),
                    )
                } else if msg.contains("priority") {
                    Some("Valid priorities: Low, Medium, High".to_string())
                } else if msg.contains("role") {
                    Some("Valid roles: admin, agent".to_string())
                } else {
                    None
                }
            }

            Self::Http(_) | Self::Remote(_) => Some(
                "Local data is unaffected. Changes are queued and pushed when the remote is reachable."
                    .to_string(),
            ),

            Self::Config(_) => Some(
                "Check ~/.deskline/config.json or the DESKLINE_REMOTE_* environment variables."
                    .to_string(),
            ),

            Self::InvalidDocument { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
