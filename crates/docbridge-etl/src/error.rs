//! Error types for the ETL pipelines

use docbridge_common::BridgeError;
use mongodb::error::ErrorKind;
use thiserror::Error;

/// Result type alias for ETL operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Errors raised by the extraction and import pipelines
///
/// Row- and field-level data problems never surface here; they are absorbed
/// as nulls, skips and tallies. Anything that reaches this type aborts at
/// least the current batch.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Document store error: {0}")]
    DocumentStore(#[from] mongodb::error::Error),

    #[error(transparent)]
    Common(#[from] BridgeError),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The store could not be reached; safe to retry
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write to '{target}' failed: {message}")]
    Write { target: String, message: String },

    #[error("Run cancelled")]
    Cancelled,
}

impl EtlError {
    /// Whether the failure is a connectivity problem worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            EtlError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            EtlError::DocumentStore(e) => matches!(
                *e.kind,
                ErrorKind::Io(_)
                    | ErrorKind::ServerSelection { .. }
                    | ErrorKind::ConnectionPoolCleared { .. }
            ),
            EtlError::Unavailable(_) => true,
            _ => false,
        }
    }

    pub fn write(target: impl Into<String>, message: impl Into<String>) -> Self {
        EtlError::Write {
            target: target.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EtlError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(EtlError::Unavailable("connection reset".into()).is_transient());
        assert!(!EtlError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!EtlError::write("GiftCardPayment", "numeric field overflow").is_transient());
        assert!(!EtlError::Cancelled.is_transient());
    }

    #[test]
    fn test_common_error_is_transparent() {
        let err: EtlError = BridgeError::catalog("entity 'X' has no fields").into();
        assert_eq!(err.to_string(), "Invalid catalog: entity 'X' has no fields");
    }
}
