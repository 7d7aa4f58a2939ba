//! The provider capability the orchestrator and conversation loop run against.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{ProviderError, RunConfig, RunFailure, Task, TaskResult};

/// Adapter that runs a task against one AI service.
///
/// `run` must honour `cancel` at every suspension point. On failure it
/// returns whatever it gathered before failing (prompts, token usage) in
/// [`RunFailure::partial`]; transient failures carry the
/// [`ProviderError::Retryable`] marker.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        &self,
        cancel: &CancellationToken,
        config: &RunConfig,
        task: &Task,
    ) -> Result<TaskResult, RunFailure>;

    /// Release long-lived clients. Called once when the provider is retired.
    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
