//! # Error Handling
//!
//! Every fallible operation in the crate returns [`AppResult`]. Errors are grouped
//! into an [`ErrorCode`] so callers can tell a rejected request apart from a remote
//! registry that misbehaved:
//!
//! - **Validation** (`InvalidScope`, `InvalidFilter`, `BadRequest`, `NotFound`, `Conflict`):
//!   reported to the caller as-is, never retried.
//! - **Transport** (`Transport`): remote fetch failed or timed out. Synchronization
//!   stops at the last durable checkpoint.
//! - **Parse** (`FeedStructure`, `FeedEntry`, `Json`): a remote document could not be read.
//! - **Store** (`Store`, `Io`): the metadata store failed. Surfaced to list/count/exists/find callers.
//!
//! ```rust
//! use depot_server::error::{AppError, AppResult, ErrorCode};
//!
//! fn require_repository(id: &str) -> AppResult<()> {
//!     if id.trim().is_empty() {
//!         return Err(AppError::BadRequest("Repository id cannot be empty".to_string()));
//!     }
//!     Ok(())
//! }
//!
//! let err = require_repository(" ").unwrap_err();
//! assert_eq!(err.error_code(), ErrorCode::ValidationError);
//! ```

/// Machine-readable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationError, // Caller supplied bad input
    TransportError,  // Remote registry unreachable or timed out
    ParseError,      // Remote document malformed
    StoreError,      // Metadata store failure
    InternalError,   // Anything else
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::TransportError => "transport_error",
            ErrorCode::ParseError => "parse_error",
            ErrorCode::StoreError => "store_error",
            ErrorCode::InternalError => "internal_error",
        }
    }
}

/// Application-specific error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    #[error("Invalid coordinate filter: {0}")]
    InvalidFilter(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Remote fetch failed: {0}")]
    Transport(String),

    #[error("Malformed changes feed: {0}")]
    FeedStructure(String),

    #[error("Malformed feed entry: {0}")]
    FeedEntry(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Get the classification for this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::InvalidScope(_)
            | AppError::InvalidFilter(_)
            | AppError::BadRequest(_)
            | AppError::NotFound(_)
            | AppError::Conflict(_) => ErrorCode::ValidationError,
            AppError::Transport(_) => ErrorCode::TransportError,
            AppError::FeedStructure(_) | AppError::FeedEntry(_) | AppError::Json(_) => {
                ErrorCode::ParseError
            }
            AppError::Store(_) | AppError::Io(_) => ErrorCode::StoreError,
            AppError::InternalError(_) => ErrorCode::InternalError,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AppError::FeedStructure(err.to_string())
        } else {
            AppError::Transport(err.to_string())
        }
    }
}

/// Convenient result type for application operations.
pub type AppResult<T> = Result<T, AppError>;
