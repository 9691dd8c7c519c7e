//! Error taxonomy for indexing, retrieval and bulk mutation.
//!
//! Every failure the engine can report maps onto one [`ErrorKind`]. Per
//! document indexing failures are folded into an
//! [`IndexResult`](crate::retrieval::indexing_engine::IndexResult) carrying that
//! kind; other operations return [`RetrieverError`] directly.

use serde::{Deserialize, Serialize};

/// Result type used throughout the retriever.
pub type Result<T> = std::result::Result<T, RetrieverError>;

/// Stable, serializable classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Protected input that cannot be processed
    EncryptedSource,
    UnsupportedFormat,
    /// Extraction, chunking or embedding failure
    ProcessingError,
    /// Store unreachable; retryable
    ConnectionError,
    /// Duplicate `(document_id, chunk_index)` insert
    ConstraintViolation,
    /// Rejected input, e.g. an empty-filter delete
    ValidationError,
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EncryptedSource => "encrypted_source",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::ProcessingError => "processing_error",
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::UnknownError => "unknown_error",
        }
    }

    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::ConnectionError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for all retriever operations.
#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    #[error("Source is encrypted: {source_uri}")]
    EncryptedSource { source_uri: String },

    #[error("Unsupported format '{format}' for {source_uri}")]
    UnsupportedFormat { source_uri: String, format: String },

    #[error("Processing failed: {message}")]
    Processing { message: String },

    #[error("Embedding failed: {source}")]
    Embedding {
        #[from]
        source: docsift_embed::EmbedError,
    },

    #[error("Store connection failed: {source}")]
    Connection {
        #[source]
        source: sqlx::Error,
    },

    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Database error: {source}")]
    Database {
        #[source]
        source: sqlx::Error,
    },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl RetrieverError {
    pub fn processing<S: Into<String>>(message: S) -> Self {
        Self::Processing {
            message: message.into(),
        }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Classify this error into the stable taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RetrieverError::EncryptedSource { .. } => ErrorKind::EncryptedSource,
            RetrieverError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            RetrieverError::Processing { .. }
            | RetrieverError::Embedding { .. }
            | RetrieverError::Io { .. } => ErrorKind::ProcessingError,
            RetrieverError::Connection { .. } => ErrorKind::ConnectionError,
            RetrieverError::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            RetrieverError::Validation { .. } | RetrieverError::Config { .. } => {
                ErrorKind::ValidationError
            }
            RetrieverError::Database { .. } | RetrieverError::Serialization { .. } => {
                ErrorKind::UnknownError
            }
        }
    }
}

impl From<sqlx::Error> for RetrieverError {
    fn from(source: sqlx::Error) -> Self {
        match &source {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => RetrieverError::Connection { source },
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RetrieverError::ConstraintViolation {
                    message: db.message().to_string(),
                }
            }
            sqlx::Error::Database(db) if db.code().is_some_and(|c| is_lock_contention(&c)) => {
                RetrieverError::Connection { source }
            }
            _ => RetrieverError::Database { source },
        }
    }
}

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6), including their extended codes.
fn is_lock_contention(code: &str) -> bool {
    code.parse::<i32>()
        .is_ok_and(|code| matches!(code & 0xff, 5 | 6))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ValidationError).unwrap();
        assert_eq!(json, "\"validation_error\"");
        assert_eq!(ErrorKind::EncryptedSource.to_string(), "encrypted_source");
    }

    #[test]
    fn test_pool_errors_are_retryable_connection_errors() {
        let err = RetrieverError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind(), ErrorKind::ConnectionError);
        assert!(err.kind().is_retryable());
    }

    #[test]
    fn test_row_not_found_is_unknown() {
        let err = RetrieverError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), ErrorKind::UnknownError);
        assert!(!err.kind().is_retryable());
    }

    #[test]
    fn test_lock_contention_codes() {
        assert!(is_lock_contention("5"));
        assert!(is_lock_contention("6"));
        // SQLITE_BUSY_SNAPSHOT, SQLITE_LOCKED_SHAREDCACHE
        assert!(is_lock_contention("517"));
        assert!(is_lock_contention("262"));
        assert!(!is_lock_contention("2067"));
        assert!(!is_lock_contention("1"));
        assert!(!is_lock_contention("SQLITE_BUSY"));
    }

    #[tokio::test]
    async fn test_busy_database_is_retryable() -> std::result::Result<(), Box<dyn std::error::Error>> {
        use sqlx::ConnectOptions;
        use sqlx::sqlite::SqliteConnectOptions;
        use std::time::Duration;

        let dir = tempfile::tempdir()?;
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("busy.db"))
            .create_if_missing(true)
            .busy_timeout(Duration::ZERO);
        let mut holder = options.connect().await?;
        let mut writer = options.connect().await?;

        sqlx::query("CREATE TABLE t (x INTEGER)")
            .execute(&mut holder)
            .await?;
        sqlx::query("BEGIN EXCLUSIVE").execute(&mut holder).await?;

        let err = sqlx::query("INSERT INTO t VALUES (1)")
            .execute(&mut writer)
            .await
            .unwrap_err();
        let err = RetrieverError::from(err);
        assert_eq!(err.kind(), ErrorKind::ConnectionError);
        assert!(err.kind().is_retryable());

        sqlx::query("ROLLBACK").execute(&mut holder).await?;
        Ok(())
    }

    #[test]
    fn test_validation_kind() {
        assert_eq!(
            RetrieverError::validation("empty filters").kind(),
            ErrorKind::ValidationError
        );
    }
}
