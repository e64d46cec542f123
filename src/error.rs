//! A single error kind threaded through every public boundary.
//!
//! One enum flows through every operation instead of a per-subsystem split,
//! so every component here returns `Result<T, Error>`.

use thiserror::Error;

/// Classification of an [`Error`]: each boundary failure maps to exactly one
/// of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A lookup for a missing id (task, lease, agent, snapshot, baseline, ...).
    NotFound,
    /// Duplicate id on create, or a lease already held by another agent.
    Conflict,
    /// A state-machine violation (e.g. completing a task that isn't in progress).
    Precondition,
    /// The storage engine is not initialized or unreachable.
    ConnectionError,
    /// A transaction's bounded retries were exhausted.
    TransactionError,
    /// Invalid input (empty title, out-of-range importance, embedding dimension mismatch).
    Validation,
    /// An embedding provider (or other external collaborator) failed or is absent.
    ExternalUnavailable,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Precondition => "PRECONDITION",
            ErrorKind::ConnectionError => "CONNECTION_ERROR",
            ErrorKind::TransactionError => "TRANSACTION_ERROR",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::ExternalUnavailable => "EXTERNAL_UNAVAILABLE",
        };
        write!(f, "{s}")
    }
}

/// The crate-wide error type. Carries a [`ErrorKind`] plus a human-readable
/// message, and preserves the underlying cause where one exists.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn external_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalUnavailable, message)
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransactionError, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionError, message)
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => Error::new(ErrorKind::NotFound, "row not found"),
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
                Error::with_source(ErrorKind::ConnectionError, "database pool unavailable", e)
            }
            _ => Error::with_source(ErrorKind::ConnectionError, "database error", e),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Validation, "serialization error", e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display_uses_screaming_snake_case_tokens() {
        assert_eq!(ErrorKind::NotFound.to_string(), "NOT_FOUND");
        assert_eq!(ErrorKind::ExternalUnavailable.to_string(), "EXTERNAL_UNAVAILABLE");
    }

    #[test]
    fn not_found_helper_sets_kind() {
        let err = Error::not_found("task bd-12345678");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("bd-12345678"));
    }
}
