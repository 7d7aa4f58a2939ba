//! Task-scoped tool state for one provider run.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{Task, TaskTool, ToolUsage};
use crate::sandbox::{
    usage_stats_of, ContainerRuntime, DockerRuntime, DockerTool, DockerToolExecutor, ToolConfig,
    ToolError, ToolResult,
};

use super::turn::{ToolCall, ToolDefinition};

/// The tools one task run may call, with their executor.
///
/// The executor is only created when the task enables at least one tool, so
/// runs without tools never touch the container engine.
pub struct ToolSession<R: ContainerRuntime = DockerRuntime> {
    executor: Option<DockerToolExecutor<R>>,
    definitions: Vec<ToolDefinition>,
    auxiliary: BTreeMap<String, Vec<u8>>,
}

impl<R: ContainerRuntime> ToolSession<R> {
    /// Session without tools.
    pub fn empty() -> Self {
        Self {
            executor: None,
            definitions: Vec::new(),
            auxiliary: BTreeMap::new(),
        }
    }

    /// Resolve the task's enabled tools against `catalogue`, then connect,
    /// validate every image and register the tools with task-scoped limits.
    ///
    /// `connect` is only called when there is at least one tool.
    pub async fn open<F>(catalogue: &[ToolConfig], task: &Task, connect: F) -> ToolResult<Self>
    where
        F: FnOnce() -> ToolResult<DockerToolExecutor<R>>,
    {
        let resolved = resolve_tools(catalogue, task)?;
        if resolved.is_empty() {
            return Ok(Self::empty());
        }

        let auxiliary = task.load_auxiliary_data().map_err(|e| {
            ToolError::Internal(format!(
                "failed to load auxiliary files of task '{}': {e}",
                task.name
            ))
        })?;

        let executor = connect()?;
        if let Err(err) = register_all(&executor, &resolved).await {
            if let Err(close_err) = executor.close().await {
                warn!(error = %close_err, "failed to close executor after tool validation failure");
            }
            return Err(err);
        }

        debug!(
            task = %task.name,
            tools = resolved.len(),
            auxiliary_files = auxiliary.len(),
            "tool session opened"
        );
        Ok(Self {
            executor: Some(executor),
            definitions: resolved
                .iter()
                .map(|(config, _)| ToolDefinition::from(*config))
                .collect(),
            auxiliary,
        })
    }

    pub fn has_tools(&self) -> bool {
        !self.definitions.is_empty()
    }

    /// Tools to advertise to the model, in task declaration order.
    pub fn tool_definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn executor(&self) -> Option<&DockerToolExecutor<R>> {
        self.executor.as_ref()
    }

    /// Execute one model-requested call.
    pub async fn execute(&self, cancel: &CancellationToken, call: &ToolCall) -> ToolResult<String> {
        let executor = match &self.executor {
            Some(executor) if self.definitions.iter().any(|d| d.name == call.name) => executor,
            _ => {
                return Err(ToolError::NotFound(format!(
                    "model requested tool '{}' which is not available for this task",
                    call.name
                )))
            }
        };
        executor
            .execute_tool(cancel, &call.name, &call.arguments, &self.auxiliary)
            .await
    }

    /// True once every tool has a call budget and all of them are spent.
    pub fn budgets_exhausted(&self) -> bool {
        let Some(executor) = &self.executor else {
            return false;
        };
        self.has_tools()
            && self
                .definitions
                .iter()
                .all(|d| executor.remaining_calls(&d.name) == Some(0))
    }

    pub fn usage(&self) -> BTreeMap<String, ToolUsage> {
        usage_stats_of(self.executor.as_ref())
    }

    pub async fn close(&self) -> ToolResult<()> {
        match &self.executor {
            Some(executor) => executor.close().await,
            None => Ok(()),
        }
    }
}

fn resolve_tools<'a>(
    catalogue: &'a [ToolConfig],
    task: &'a Task,
) -> ToolResult<Vec<(&'a ToolConfig, &'a TaskTool)>> {
    task.enabled_tools()
        .map(|policy| {
            catalogue
                .iter()
                .find(|config| config.name == policy.name)
                .map(|config| (config, policy))
                .ok_or_else(|| {
                    ToolError::NotFound(format!(
                        "task '{}' enables tool '{}' which is not configured",
                        task.name, policy.name
                    ))
                })
        })
        .collect()
}

async fn register_all<R: ContainerRuntime>(
    executor: &DockerToolExecutor<R>,
    resolved: &[(&ToolConfig, &TaskTool)],
) -> ToolResult<()> {
    for (config, policy) in resolved {
        executor.validate_tool(config).await?;
        executor.register_tool(DockerTool::for_task((*config).clone(), policy));
    }
    Ok(())
}
