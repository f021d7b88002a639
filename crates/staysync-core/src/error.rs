//! Error types for staysync-core

use serde::Serialize;
use thiserror::Error;

/// Result type alias using staysync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in staysync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or semantically invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced listing, channel link, event or conflict is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not legal in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Feed token failed verification or was revoked
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Stable, transport-independent classification of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidState,
    Auth,
    Internal,
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Database(_) => ErrorKind::Internal,
        }
    }

    /// Whether the error is a transient lock failure worth one retry
    pub(crate) fn is_transient(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
