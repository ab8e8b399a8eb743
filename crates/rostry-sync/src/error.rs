//! Error types for rostry-sync

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias using rostry-sync's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in rostry-sync operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote store error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// No fetcher definition is registered under the requested id
    #[error("Fetcher not registered: {0}")]
    FetcherNotRegistered(String),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure classes reported by the remote store adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Connectivity lost or refused mid-call
    Network,
    /// The call did not answer in time
    Timeout,
    /// 5xx-style server fault
    Server,
    /// The payload was rejected as invalid
    Validation,
    /// The caller is not allowed to write this entity
    Permission,
    /// The remote document does not exist
    NotFound,
}

impl RemoteErrorKind {
    /// Whether another attempt may succeed without changing the payload.
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Server)
    }

    /// Classification shown on the sync issues list.
    pub const fn issue_class(self) -> IssueClass {
        match self {
            Self::Network | Self::Timeout | Self::Server => IssueClass::Network,
            Self::Validation => IssueClass::Validation,
            Self::Permission => IssueClass::Permission,
            Self::NotFound => IssueClass::Unknown,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Server => "server",
            Self::Validation => "validation",
            Self::Permission => "permission",
            Self::NotFound => "not_found",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "network" => Some(Self::Network),
            "timeout" => Some(Self::Timeout),
            "server" => Some(Self::Server),
            "validation" => Some(Self::Validation),
            "permission" => Some(Self::Permission),
            "not_found" => Some(Self::NotFound),
            _ => None,
        }
    }
}

/// Human-facing grouping of failed outbox entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueClass {
    Network,
    Validation,
    Permission,
    Unknown,
}

/// Error raised by a remote store call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Remote {} error: {message}", kind.as_str())]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Timeout, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Validation, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Permission, message)
    }

    pub const fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_network_timeout_and_server() {
        assert!(RemoteError::network("down").is_transient());
        assert!(RemoteError::timeout("slow").is_transient());
        assert!(RemoteError::new(RemoteErrorKind::Server, "503").is_transient());
        assert!(!RemoteError::validation("bad price").is_transient());
        assert!(!RemoteError::permission("denied").is_transient());
    }

    #[test]
    fn kind_round_trips_through_storage_label() {
        for kind in [
            RemoteErrorKind::Network,
            RemoteErrorKind::Timeout,
            RemoteErrorKind::Server,
            RemoteErrorKind::Validation,
            RemoteErrorKind::Permission,
            RemoteErrorKind::NotFound,
        ] {
            assert_eq!(RemoteErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RemoteErrorKind::parse("bogus"), None);
    }

    #[test]
    fn remote_error_display_names_kind() {
        let error = RemoteError::permission("seller mismatch");
        assert_eq!(error.to_string(), "Remote permission error: seller mismatch");
    }
}
