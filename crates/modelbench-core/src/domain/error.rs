//! Provider and orchestration error taxonomy.

use crate::domain::result::TaskResult;
use crate::sandbox::ToolError;

/// Boxed error carried by the retryable marker.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by providers and the task executor.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Transient failure; the executor retries these according to the run's
    /// retry policy. Nothing else is ever retried.
    #[error("retryable error: {0}")]
    Retryable(#[source] BoxError),

    #[error("provider api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProviderError {
    /// Mark any error as transient.
    pub fn retryable<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        ProviderError::Retryable(err.into())
    }

    /// Classify a failed HTTP exchange with a model API.
    ///
    /// Rate limiting (429) and gateway-class failures (502, 503, 504) are
    /// transient; every other status is an ordinary API error.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        match status {
            429 | 502 | 503 | 504 => ProviderError::retryable(ApiStatusError { status, message }),
            _ => ProviderError::Api { status, message },
        }
    }

    /// Whether this error carries the retryable marker.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Retryable(_))
    }
}

/// Source error wrapped by [`ProviderError::from_status`] for transient statuses.
#[derive(Debug, thiserror::Error)]
#[error("provider api error (status {status}): {message}")]
pub struct ApiStatusError {
    pub status: u16,
    pub message: String,
}

/// A failed provider run together with everything the run gathered before it
/// failed (prompts sent, token usage, tool usage).
///
/// Displays as the underlying error so callers see the real cause.
#[derive(Debug)]
pub struct RunFailure {
    pub partial: TaskResult,
    pub error: ProviderError,
}

impl RunFailure {
    pub fn new(partial: TaskResult, error: impl Into<ProviderError>) -> Self {
        Self {
            partial,
            error: error.into(),
        }
    }

    /// Failure that happened before anything was sent.
    pub fn without_result(error: impl Into<ProviderError>) -> Self {
        Self::new(TaskResult::default(), error)
    }

    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        for status in [429, 502, 503, 504] {
            let err = ProviderError::from_status(status, "busy");
            assert!(err.is_retryable(), "status {status} should be retryable");
            assert!(err.to_string().contains("busy"));
        }
        for status in [400, 401, 404, 500] {
            let err = ProviderError::from_status(status, "nope");
            assert!(!err.is_retryable(), "status {status} should be fatal");
        }
    }

    #[test]
    fn test_tool_errors_are_not_retryable() {
        let err: ProviderError = ToolError::Internal("docker gone".into()).into();
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "tool internal error: docker gone");
    }

    #[test]
    fn test_run_failure_displays_underlying_error() {
        let mut partial = TaskResult::default();
        partial.record_prompt("2 + 2?");
        let failure = RunFailure::new(partial, ProviderError::from_status(503, "overloaded"));

        assert!(failure.is_retryable());
        assert_eq!(
            failure.to_string(),
            "retryable error: provider api error (status 503): overloaded"
        );
        assert_eq!(failure.partial.prompts(), ["2 + 2?"]);
    }
}
