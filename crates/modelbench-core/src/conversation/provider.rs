//! A [`Provider`] built from a chat backend and the tool-calling loop.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::domain::{ProviderError, RunConfig, RunFailure, Task, TaskResult};
use crate::execution::Provider;
use crate::sandbox::{ContainerRuntime, DockerRuntime, DockerToolExecutor, ToolConfig, ToolResult};

use super::driver::{run_conversation, Conversation};
use super::session::ToolSession;
use super::turn::ToolDefinition;

/// Service-specific half of a tool-capable provider.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    type Conversation: Conversation;

    fn name(&self) -> &str;

    /// Build the initial request: instructions, the task prompt, the
    /// structured-output schema when `config.structured_output` is set, and
    /// `tools` when non-empty.
    fn start(
        &self,
        config: &RunConfig,
        task: &Task,
        tools: &[ToolDefinition],
    ) -> Result<Self::Conversation, ProviderError>;

    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

type Connector<R> = Arc<dyn Fn() -> ToolResult<DockerToolExecutor<R>> + Send + Sync>;

/// Runs tasks on a [`ChatBackend`], executing requested tools in containers.
pub struct ToolCallingProvider<B, R: ContainerRuntime = DockerRuntime> {
    backend: B,
    catalogue: Vec<ToolConfig>,
    connect: Connector<R>,
    scratch_root: Option<PathBuf>,
}

impl<B: ChatBackend> ToolCallingProvider<B, DockerRuntime> {
    /// Tools run on the local Docker engine.
    pub fn new(backend: B, catalogue: Vec<ToolConfig>) -> Self {
        Self::with_connector(backend, catalogue, DockerToolExecutor::connect)
    }
}

impl<B: ChatBackend, R: ContainerRuntime> ToolCallingProvider<B, R> {
    /// Tools run on executors produced by `connect`, called once per run
    /// that needs tools.
    pub fn with_connector<F>(backend: B, catalogue: Vec<ToolConfig>, connect: F) -> Self
    where
        F: Fn() -> ToolResult<DockerToolExecutor<R>> + Send + Sync + 'static,
    {
        Self {
            backend,
            catalogue,
            connect: Arc::new(connect),
            scratch_root: None,
        }
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn connect_executor(&self) -> ToolResult<DockerToolExecutor<R>> {
        let executor = (self.connect)()?;
        Ok(match &self.scratch_root {
            Some(root) => executor.with_scratch_root(root),
            None => executor,
        })
    }

    async fn converse(
        &self,
        cancel: &CancellationToken,
        config: &RunConfig,
        task: &Task,
        session: &ToolSession<R>,
        result: &mut TaskResult,
    ) -> Result<(), ProviderError> {
        let mut conversation = self
            .backend
            .start(config, task, session.tool_definitions())?;
        result.record_prompt(task.prompt.clone());
        run_conversation(
            cancel,
            &mut conversation,
            session,
            config.structured_output,
            result,
        )
        .await
    }
}

#[async_trait]
impl<B, R> Provider for ToolCallingProvider<B, R>
where
    B: ChatBackend,
    R: ContainerRuntime,
{
    fn name(&self) -> &str {
        self.backend.name()
    }

    #[instrument(skip_all, fields(provider = %self.backend.name(), task = %task.name))]
    async fn run(
        &self,
        cancel: &CancellationToken,
        config: &RunConfig,
        task: &Task,
    ) -> Result<TaskResult, RunFailure> {
        let mut result = TaskResult::new();
        let session =
            match ToolSession::open(&self.catalogue, task, || self.connect_executor()).await {
                Ok(session) => session,
                Err(err) => return Err(RunFailure::new(result, err)),
            };

        let outcome = self
            .converse(cancel, config, task, &session, &mut result)
            .await;

        if let Err(err) = session.close().await {
            warn!(error = %err, "failed to release tool session");
        }

        match outcome {
            Ok(()) => Ok(result),
            Err(err) => Err(RunFailure::new(result, err)),
        }
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.backend.close().await
    }
}
