//! Error types for the sync pipelines.

use std::fmt;

/// What went wrong talking to the central log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Malformed input rejected by the backend (e.g. a bad uuid)
    InvalidInput,
    /// A row with the same key is already committed
    UniqueViolation,
    /// Table or column missing on the backend
    SchemaMissing,
    /// Generic HTTP 400
    BadRequest,
    /// Connection refused, dropped or offline
    Network,
    /// No answer within the allowed time
    Timeout,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::InvalidInput => "invalid input",
            TransportErrorKind::UniqueViolation => "unique violation",
            TransportErrorKind::SchemaMissing => "schema missing",
            TransportErrorKind::BadRequest => "bad request",
            TransportErrorKind::Network => "network error",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Other => "transport error",
        };
        f.write_str(name)
    }
}

/// How the outgoing pipeline reacts to a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Resending cannot succeed: drop the batch and roll back
    Permanent,
    /// Worth retrying on the next cycle
    Transient,
}

/// A failed call to the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    /// Build an error from the backend's SQLSTATE / PostgREST code and HTTP
    /// status, whichever is known.
    pub fn from_code(
        code: Option<&str>,
        http_status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        let kind = match (code, http_status) {
            (Some("22P02" | "22023"), _) => TransportErrorKind::InvalidInput,
            // PostgreSQL unique violation
            (Some("23505"), _) => TransportErrorKind::UniqueViolation,
            (Some("42P01" | "42703" | "PGRST204"), _) => TransportErrorKind::SchemaMissing,
            (_, Some(400)) => TransportErrorKind::BadRequest,
            (_, Some(408 | 504)) => TransportErrorKind::Timeout,
            (_, Some(502 | 503)) => TransportErrorKind::Network,
            _ => TransportErrorKind::Other,
        };
        Self::new(kind, message)
    }

    pub fn classify(&self) -> ErrorClass {
        match self.kind {
            TransportErrorKind::InvalidInput
            | TransportErrorKind::UniqueViolation
            | TransportErrorKind::SchemaMissing
            | TransportErrorKind::BadRequest => ErrorClass::Permanent,
            TransportErrorKind::Network | TransportErrorKind::Timeout | TransportErrorKind::Other => {
                ErrorClass::Transient
            }
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.classify() == ErrorClass::Permanent
    }
}

/// A failed call to local durable storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Top-level error of the sync engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("engine error: {0}")]
    Engine(#[from] lineage_engine::Error),

    #[error("reconciliation failed: {0}")]
    ReconcileFailed(#[source] TransportError),

    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("sync engine shut down")]
    Shutdown,
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_backend_codes() {
        let cases = [
            (Some("22P02"), None, ErrorClass::Permanent),
            (Some("22023"), None, ErrorClass::Permanent),
            (Some("23505"), Some(409), ErrorClass::Permanent),
            (Some("42P01"), None, ErrorClass::Permanent),
            (Some("42703"), None, ErrorClass::Permanent),
            (Some("PGRST204"), Some(400), ErrorClass::Permanent),
            (None, Some(400), ErrorClass::Permanent),
            (None, Some(500), ErrorClass::Transient),
            (None, Some(503), ErrorClass::Transient),
            (Some("57014"), None, ErrorClass::Transient),
            (None, None, ErrorClass::Transient),
        ];

        for (code, status, expected) in cases {
            let err = TransportError::from_code(code, status, "boom");
            assert_eq!(err.classify(), expected, "code {code:?} status {status:?}");
        }
    }

    #[test]
    fn kinds_from_codes() {
        assert_eq!(
            TransportError::from_code(Some("23505"), None, "dup").kind,
            TransportErrorKind::UniqueViolation
        );
        assert_eq!(
            TransportError::from_code(Some("PGRST204"), None, "col").kind,
            TransportErrorKind::SchemaMissing
        );
        assert_eq!(
            TransportError::from_code(None, Some(504), "slow").kind,
            TransportErrorKind::Timeout
        );
    }

    #[test]
    fn error_display() {
        let err = TransportError::network("connection reset");
        assert_eq!(err.to_string(), "network error: connection reset");

        let err = SyncError::from(TransportError::from_code(Some("23505"), None, "duplicate key"));
        assert_eq!(err.to_string(), "transport error: unique violation: duplicate key");

        let err = SyncError::ReconcileFailed(TransportError::timeout("fetch"));
        assert_eq!(err.to_string(), "reconciliation failed: timeout: fetch");

        let err = SyncError::from(crate::config::ConfigError::Zero("LINEAGE_BACKUP_EVERY"));
        assert_eq!(
            err.to_string(),
            "invalid configuration: LINEAGE_BACKUP_EVERY must be greater than zero"
        );
    }
}
