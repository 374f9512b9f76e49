//! Error Types
//!
//! Typed failures surfaced by the public operations. Collaborator failures
//! that happen inside a resolution strategy are never returned from
//! `resolve`; they are converted into log entries instead.

use thiserror::Error;

/// Errors returned by the tracker, resolver and registry
#[derive(Debug, Error)]
pub enum ResolverError {
    /// Malformed caller input or configuration
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `add_version` preconditions violated; nothing was mutated
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResolverError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

/// A failed call to one of the remote services.
///
/// `status` carries the HTTP status when the service answered; transport
/// failures and timeouts leave it empty.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct FetchError {
    pub status: Option<u16>,
    pub message: String,
}

impl FetchError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(Some(status), message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    /// True for 401/403 responses
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status, Some(401) | Some(403))
    }

    /// Status code rendered for error records, `UNKNOWN` when absent
    pub fn code(&self) -> String {
        self.status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(err.status().map(|s| s.as_u16()), err.to_string())
    }
}

/// Failures of the durable key-value tier
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The backing storage has no room left
    #[error("store is full")]
    Full,
}

impl StoreError {
    /// Map SQLite's disk-full condition onto [`StoreError::Full`]
    pub fn from_sqlite(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DiskFull) => StoreError::Full,
            _ => StoreError::Sqlite(err),
        }
    }
}

pub type Result<T, E = ResolverError> = std::result::Result<T, E>;
