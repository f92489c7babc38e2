//! Error types for hass-migrate.
//!
//! Only run-level failures are errors. Row and field problems met while
//! converting records are reported as [`crate::transform::SkipReason`] and
//! [`crate::transform::FieldWarning`] values and never abort a run.

use thiserror::Error;

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while migrating.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The source database could not be opened or queried.
    #[error("Source connection error: {0}")]
    SourceConnection(String),

    /// A row could not be read from the source cursor.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// The target store is unreachable.
    #[error("Target connection error: {0}")]
    TargetConnection(String),

    /// The target store rejected the credentials.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The target store asked us to slow down (retry after N seconds).
    #[error("Rate limited, retry after {0}s")]
    RateLimit(u64),

    /// A query against the target store failed.
    #[error("Query error: {0}")]
    Query(String),

    /// A batch write to the target store failed.
    #[error("Write error: {0}")]
    Write(String),

    /// The target stored a batch only in part, with the response body.
    #[error("Partial write: {0}")]
    PartialWrite(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parse error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SQLite driver error.
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Write("bucket not found".to_string());
        assert_eq!(err.to_string(), "Write error: bucket not found");

        let err = Error::RateLimit(30);
        assert_eq!(err.to_string(), "Rate limited, retry after 30s");
    }
}
