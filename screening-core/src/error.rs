//! Error types for the screening pipeline

use crate::types::SourceId;
use thiserror::Error;

/// Result type for screening operations
pub type Result<T> = std::result::Result<T, Error>;

/// Screening errors
///
/// Only [`Error::InvalidInput`] and [`Error::BothSourcesUnavailable`] ever leave the
/// orchestrator; everything else is caught at its boundary and turned into an envelope flag.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Empty or malformed request
    #[error("Invalid screening input: {0}")]
    InvalidInput(String),

    /// Source did not answer within its budget
    #[error("{source_id} source timed out after {seconds}s")]
    SourceTimeout {
        /// Source that timed out
        source_id: SourceId,
        /// Applied timeout
        seconds: u64,
    },

    /// Source answered with an error or could not be reached
    #[error("{source_id} source unavailable: {reason}")]
    SourceUnavailable {
        /// Failing source
        source_id: SourceId,
        /// Reason
        reason: String,
    },

    /// Neither source produced a usable answer
    #[error("Both sanctions sources unavailable (EU: {eu}; UN: {un})")]
    BothSourcesUnavailable {
        /// EU failure
        eu: String,
        /// UN failure
        un: String,
    },

    /// External summarization failed or is not configured
    #[error("Summarization unavailable: {0}")]
    SummarizationUnavailable(String),

    /// Evidence capture failed
    #[error("Evidence capture failed: {0}")]
    CaptureFailed(String),

    /// Evidence or audit write failed after retry
    #[error("Persistence degraded: {0}")]
    PersistenceDegraded(String),

    /// Object storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Presigned URL rejected
    #[error("Presigned URL rejected: {0}")]
    PresignRejected(String),

    /// Audit log hash chain does not verify
    #[error("Audit integrity check failed: {0}")]
    AuditIntegrity(String),

    /// Consolidated list could not be parsed
    #[error("List parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl Error {
    /// Classify a transport failure against a source
    pub fn from_source_request(source: SourceId, timeout_secs: u64, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::SourceTimeout {
                source_id: source,
                seconds: timeout_secs,
            }
        } else {
            Error::SourceUnavailable {
                source_id: source,
                reason: err.to_string(),
            }
        }
    }
}
