//! Common error types for the SMILE lakehouse
//!
//! These are infrastructure failures. Per-record problems (undecodable files,
//! malformed JSON) have their own error types in `smile-ingest` and never
//! surface through this enum.

use thiserror::Error;

/// Common result type for lakehouse operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the lakehouse crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error means the landing store or the persistent store is gone.
    ///
    /// Anything else escaping the pipeline is an internal error.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Io(_) | Error::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts_and_is_infrastructure() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume");
        let err: Error = io.into();
        assert!(err.is_infrastructure());
        assert!(err.to_string().starts_with("IO error:"));
    }

    #[test]
    fn test_config_error_is_not_infrastructure() {
        let err = Error::Config("landing_path missing".to_string());
        assert!(!err.is_infrastructure());
        assert_eq!(err.to_string(), "Configuration error: landing_path missing");
    }
}
