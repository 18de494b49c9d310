//! Typed error hierarchy for gosh-offline
//!
//! Errors never escape a monitor loop: every failure is turned into a
//! terminal decision and recorded on the task. The types here describe what
//! went wrong at the collaborator boundaries (engine, store, validator, job
//! factory) so the monitor can decide what to record.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the offline download monitor
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Transport-level failure talking to the engine
    #[error("Network error: {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
        retryable: bool,
    },

    /// The engine answered with a JSON-RPC error object
    #[error("Engine RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Storage/filesystem errors
    #[error("Storage error at {path:?}: {message}")]
    Storage {
        kind: StorageErrorKind,
        path: PathBuf,
        message: String,
    },

    /// A file or quota constraint was violated
    #[error("{message}")]
    Validation {
        kind: ValidationErrorKind,
        message: String,
    },

    /// Transfer job could not be created or submitted
    #[error("Transfer job error: {0}")]
    Job(String),

    /// Invalid input from the caller
    #[error("Invalid input for '{field}': {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },

    /// Task or record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Task is already being monitored
    #[error("Already monitored: {0}")]
    AlreadyExists(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Supervisor is shutting down
    #[error("Monitor is shutting down")]
    Shutdown,

    /// Internal error (bug)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Network error subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// Connection refused or unreachable
    ConnectionRefused,
    /// Request timed out
    Timeout,
    /// Engine returned an HTTP error status
    HttpStatus(u16),
    /// Response body could not be decoded
    InvalidResponse,
    /// WebSocket transport failure
    WebSocket,
    /// Other network error
    Other,
}

/// Storage error subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// File/directory not found
    NotFound,
    /// Permission denied
    PermissionDenied,
    /// File already exists
    AlreadyExists,
    /// I/O error
    Io,
}

/// Constraint violation subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// The task owner does not exist
    OwnerNotFound,
    /// File name contains illegal characters or is too long
    InvalidName,
    /// File exceeds the owner's per-file size limit
    FileTooLarge,
    /// File extension is not in the owner's allow-list
    ExtensionNotAllowed,
    /// Owner's remaining capacity is smaller than the file
    InsufficientCapacity,
}

impl MonitorError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { retryable, .. } => *retryable,
            Self::Storage { kind, .. } => matches!(kind, StorageErrorKind::Io),
            _ => false,
        }
    }

    /// Check if this error is a constraint violation
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Create a network error
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(
            kind,
            NetworkErrorKind::Timeout | NetworkErrorKind::ConnectionRefused
        );
        Self::Network {
            kind,
            message: message.into(),
            retryable,
        }
    }

    /// Create a storage error
    pub fn storage(
        kind: StorageErrorKind,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self::Storage {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self::Validation {
            kind,
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            message: message.into(),
        }
    }
}

/// Result type alias for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match err.kind() {
            ErrorKind::NotFound => StorageErrorKind::NotFound,
            ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            ErrorKind::AlreadyExists => StorageErrorKind::AlreadyExists,
            _ => StorageErrorKind::Io,
        };
        Self::Storage {
            kind,
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

impl From<tokio::task::JoinError> for MonitorError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Task join error: {}", err))
    }
}

#[cfg(feature = "rpc")]
impl From<reqwest::Error> for MonitorError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            NetworkErrorKind::Timeout
        } else if err.is_connect() {
            NetworkErrorKind::ConnectionRefused
        } else if let Some(status) = err.status() {
            NetworkErrorKind::HttpStatus(status.as_u16())
        } else if err.is_decode() {
            NetworkErrorKind::InvalidResponse
        } else {
            NetworkErrorKind::Other
        };
        Self::network(kind, err.to_string())
    }
}

#[cfg(any(feature = "rpc", feature = "notify"))]
impl From<url::ParseError> for MonitorError {
    fn from(err: url::ParseError) -> Self {
        Self::invalid_input("url", err.to_string())
    }
}

#[cfg(feature = "notify")]
impl From<tokio_tungstenite::tungstenite::Error> for MonitorError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::network(NetworkErrorKind::WebSocket, err.to_string())
    }
}

#[cfg(feature = "storage")]
impl From<rusqlite::Error> for MonitorError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_storage_kind() {
        let err: MonitorError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert!(matches!(
            err,
            MonitorError::Storage {
                kind: StorageErrorKind::NotFound,
                ..
            }
        ));
    }

    #[test]
    fn validation_error_displays_bare_message() {
        let err = MonitorError::validation(ValidationErrorKind::FileTooLarge, "file too large");
        assert_eq!(err.to_string(), "file too large");
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn timeouts_are_retryable() {
        assert!(MonitorError::network(NetworkErrorKind::Timeout, "slow").is_retryable());
        assert!(!MonitorError::network(NetworkErrorKind::HttpStatus(500), "boom").is_retryable());
    }
}
