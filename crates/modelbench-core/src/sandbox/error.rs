//! Error types for the sandbox layer.

/// Failure taxonomy for tool execution.
///
/// Each variant carries a human readable detail; the display string is the
/// kind followed by that detail, and is what a model sees when a failure is
/// reported back to it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// Tool unregistered, or its image is missing from the local store.
    #[error("tool not available: {0}")]
    NotAvailable(String),

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("tool max calls exceeded: {0}")]
    MaxCallsExceeded(String),

    #[error("tool execution timeout: {0}")]
    Timeout(String),

    /// Non-zero exit or empty output.
    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),

    /// Container runtime or host failure the model cannot fix.
    #[error("tool internal error: {0}")]
    Internal(String),

    /// The model asked for a tool the task does not offer.
    #[error("tool not found: {0}")]
    NotFound(String),
}

impl ToolError {
    /// Whether the failure is reported back to the model as conversation
    /// content instead of aborting the provider call.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ToolError::InvalidArguments(_)
                | ToolError::MaxCallsExceeded(_)
                | ToolError::Timeout(_)
                | ToolError::ExecutionFailed(_)
        )
    }
}

/// Errors at the container runtime boundary.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("container runtime error: {0}")]
    Api(String),
}

impl RuntimeError {
    /// "Already gone" outcomes of a removal: the container no longer exists
    /// or a removal is already in progress.
    pub fn is_gone(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_) | RuntimeError::Conflict(_))
    }
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => RuntimeError::NotFound(message),
            bollard::errors::Error::DockerResponseServerError {
                status_code: 409,
                message,
            } => RuntimeError::Conflict(message),
            other => RuntimeError::Api(other.to_string()),
        }
    }
}

/// Result type for sandbox operations.
pub type ToolResult<T> = std::result::Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        assert_eq!(
            ToolError::ExecutionFailed("tool returned no output".into()).to_string(),
            "tool execution failed: tool returned no output"
        );
        assert_eq!(
            ToolError::Timeout("execution timed out after 50ms".into()).to_string(),
            "tool execution timeout: execution timed out after 50ms"
        );
        assert!(ToolError::NotFound("x".into())
            .to_string()
            .starts_with("tool not found"));
    }

    #[test]
    fn test_recoverable_split() {
        assert!(ToolError::InvalidArguments(String::new()).is_recoverable());
        assert!(ToolError::MaxCallsExceeded(String::new()).is_recoverable());
        assert!(ToolError::Timeout(String::new()).is_recoverable());
        assert!(ToolError::ExecutionFailed(String::new()).is_recoverable());

        assert!(!ToolError::Internal(String::new()).is_recoverable());
        assert!(!ToolError::NotFound(String::new()).is_recoverable());
        assert!(!ToolError::NotAvailable(String::new()).is_recoverable());
    }

    #[test]
    fn test_bollard_status_mapping() {
        let missing = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container".into(),
        };
        assert!(matches!(RuntimeError::from(missing), RuntimeError::NotFound(_)));

        let busy = bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "removal already in progress".into(),
        };
        let busy = RuntimeError::from(busy);
        assert!(busy.is_gone());

        let boom = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "daemon exploded".into(),
        };
        let boom = RuntimeError::from(boom);
        assert!(!boom.is_gone());
        assert!(boom.to_string().contains("daemon exploded"));
    }
}
