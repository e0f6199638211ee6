//! Error types for the event store

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Store errors
#[derive(Error, Debug)]
pub enum Error {
    /// Record failed validation (missing or malformed required field)
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Malformed time range or limit
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Ledger credit with a negative value
    #[error("Negative amount: {0}")]
    NegativeAmount(String),

    /// Monetary value outside the fixed scale or overflowing
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Underlying storage engine error, wrapped with context
    #[error("Backend failure: {0}")]
    Backend(String),

    /// Compaction failed after records were pruned
    #[error("Compaction failed after pruning {pruned} records: {reason}")]
    Compaction {
        /// Records removed before compaction was attempted
        pruned: u64,
        /// Backend error text
        reason: String,
    },

    /// Unknown key on direct lookup
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write buffer is at capacity (backend is not draining)
    #[error("Write buffer full: {0} operations pending")]
    BufferFull(usize),

    /// Caller-supplied deadline passed before the operation completed
    #[error("Deadline exceeded during {0}")]
    DeadlineExceeded(&'static str),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for caller mistakes that are never worth retrying
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidRecord(_)
                | Error::InvalidRange(_)
                | Error::NegativeAmount(_)
                | Error::InvalidAmount(_)
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(Error::InvalidRecord("id".into()).is_validation());
        assert!(Error::NegativeAmount("-1".into()).is_validation());
        assert!(!Error::Backend("disk".into()).is_validation());
        assert!(!Error::DeadlineExceeded("scan").is_validation());
    }

    #[test]
    fn test_compaction_message() {
        let err = Error::Compaction {
            pruned: 12,
            reason: "io".into(),
        };
        assert_eq!(
            err.to_string(),
            "Compaction failed after pruning 12 records: io"
        );
    }
}
