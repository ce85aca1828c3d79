//! Error types for sluice
//!
//! Every failure in the pipeline falls into one of three classes, which
//! drive the retry policy:
//!
//! - transient: retried locally with bounded exponential backoff
//! - permanent: recorded against the offending batch or record, no retry
//! - fatal: aborts the job immediately, sibling jobs are unaffected

use thiserror::Error;

/// Result type alias for sluice operations
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Main error type for sluice
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Retryable: network timeout, rate limit, 5xx from a collaborator
    #[error("transient error: {0}")]
    Transient(String),

    /// Non-retryable: validation rejection, malformed record
    #[error("permanent error: {0}")]
    Permanent(String),

    /// Aborts the job: source unreachable after retries, credential failure
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Record could not be mapped to a canonical record
    #[error("mapping error for record #{sequence}: {message}")]
    Mapping { sequence: u64, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExtractError {
    /// Whether the uploader or a source adapter should retry the operation
    pub fn is_transient(&self) -> bool {
        matches!(self, ExtractError::Transient(_))
    }

    /// Permanent errors are surfaced in the run status without retry.
    /// Mapping errors are a permanent failure of a single record.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ExtractError::Permanent(_) | ExtractError::Mapping { .. }
        )
    }

    /// Wrap any error that has exhausted its retries as fatal
    pub fn into_fatal(self) -> ExtractError {
        match self {
            ExtractError::Fatal(_) => self,
            other => ExtractError::Fatal(other.to_string()),
        }
    }
}
