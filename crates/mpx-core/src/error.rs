//! Error types for MPX

use thiserror::Error;

/// The main error type for MPX operations
#[derive(Debug, Error)]
pub enum MpxError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend reported failure for request {request_id}: {detail}")]
    BackendFailed { request_id: String, detail: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Request {request_id} still pending after {waited_secs}s")]
    PollTimeout { request_id: String, waited_secs: u64 },

    #[error("Failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<MpxError>,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Template error: missing value for placeholder '{0}'")]
    MissingPlaceholder(String),

    #[error("Template error: {0}")]
    TemplateSyntax(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Worker error: {0}")]
    WorkerError(String),
}

impl MpxError {
    /// Whether a retry loop should attempt the operation again.
    ///
    /// Transport blips, backend-reported failures, unparseable model output and
    /// stalled polls are all retried the same way. Caller-side mistakes are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MpxError::Transport(_)
                | MpxError::BackendFailed { .. }
                | MpxError::MalformedResponse(_)
                | MpxError::PollTimeout { .. }
        )
    }

    /// Shorthand for a malformed-response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        MpxError::MalformedResponse(msg.into())
    }

    /// Shorthand for a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        MpxError::ValidationError(msg.into())
    }
}

/// Result type alias for MPX operations
pub type Result<T> = std::result::Result<T, MpxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(MpxError::Transport("reset".into()).is_retryable());
        assert!(MpxError::malformed("no key").is_retryable());
        assert!(MpxError::BackendFailed {
            request_id: "r1".into(),
            detail: "failed".into()
        }
        .is_retryable());
        assert!(!MpxError::validation("bad index").is_retryable());
        assert!(!MpxError::Cancelled.is_retryable());
        assert!(!MpxError::Unauthorized("401".into()).is_retryable());
    }

    #[test]
    fn test_exhausted_carries_cause() {
        let err = MpxError::RetriesExhausted {
            attempts: 3,
            last: Box::new(MpxError::Transport("timed out".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("timed out"));
        assert!(!err.is_retryable());
    }
}
