//! Docker-sandboxed tool executor.
//!
//! Runs one tool call end to end in a fresh container:
//! - budget check (`max_calls`) before anything is created
//! - argument parsing and host-side staging of bind-mounted inputs
//! - create / start / wait / read logs / remove, bounded by the tool timeout
//!   and the caller's cancellation token
//! - per-tool call count and cumulative time accounting

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::ToolUsage;
use crate::obs;

use super::docker::DockerRuntime;
use super::error::{RuntimeError, ToolError, ToolResult};
use super::registry::{ToolRegistry, UsageTracker};
use super::runtime::{BindMount, ContainerRuntime, ContainerSpec, LogStreams};
use super::tool::{DockerTool, ToolConfig};
use super::workspace::{sanitize, CallWorkspace, SharedDirectory};

/// Executes registered tools in disposable, network-isolated containers.
///
/// One executor lives for one provider run: it owns the runtime connection
/// and the shared directory, and both are released by [`close`] (or on drop).
/// Tool calls may be issued concurrently.
///
/// [`close`]: DockerToolExecutor::close
pub struct DockerToolExecutor<R: ContainerRuntime = DockerRuntime> {
    runtime: Arc<R>,
    registry: ToolRegistry,
    usage: UsageTracker,
    shared_dir: SharedDirectory,
    scratch_root: Option<PathBuf>,
}

impl DockerToolExecutor<DockerRuntime> {
    /// Connect to the local Docker engine.
    pub fn connect() -> ToolResult<Self> {
        let runtime = DockerRuntime::connect().map_err(|e| {
            ToolError::Internal(format!("failed to connect to the docker engine: {e}"))
        })?;
        Ok(Self::new(runtime))
    }
}

impl<R: ContainerRuntime> DockerToolExecutor<R> {
    pub fn new(runtime: R) -> Self {
        Self::with_registry(runtime, ToolRegistry::new())
    }

    pub fn with_registry(runtime: R, registry: ToolRegistry) -> Self {
        Self {
            runtime: Arc::new(runtime),
            registry,
            usage: UsageTracker::new(),
            shared_dir: SharedDirectory::new(),
            scratch_root: None,
        }
    }

    /// Stage call workspaces and the shared directory under `root` instead of
    /// the system temp directory.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Register (or replace) a tool.
    pub fn register_tool(&self, tool: DockerTool) {
        debug!(tool = %tool.name(), image = %tool.config.image, "registering tool");
        self.registry.register(tool);
    }

    /// Check that the tool's image is present locally. Never pulls.
    pub async fn validate_tool(&self, config: &ToolConfig) -> ToolResult<()> {
        match self.runtime.image_exists(&config.image).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ToolError::NotAvailable(format!(
                "image '{image}' for tool '{name}' is not available locally; \
                 pull it with `docker pull {image}`",
                image = config.image,
                name = config.name,
            ))),
            Err(err) => Err(ToolError::Internal(format!(
                "failed to inspect image '{}' for tool '{}': {err}",
                config.image, config.name
            ))),
        }
    }

    /// Run one tool call and return its trimmed stdout, expected to be JSON.
    ///
    /// `args` is the raw argument text from the model; it must be a JSON
    /// object. `auxiliary` maps file names to contents mounted under the
    /// tool's auxiliary directory.
    #[instrument(skip(self, cancel, args, auxiliary), fields(tool = %tool_name))]
    pub async fn execute_tool(
        &self,
        cancel: &CancellationToken,
        tool_name: &str,
        args: &str,
        auxiliary: &BTreeMap<String, Vec<u8>>,
    ) -> ToolResult<String> {
        let tool = self.registry.get(tool_name).ok_or_else(|| {
            ToolError::NotAvailable(format!(
                "tool '{tool_name}' is not registered for this task"
            ))
        })?;

        // Read-then-increment: concurrent calls to one tool may overrun by one.
        if let Some(max_calls) = tool.max_calls {
            let used = self.usage.call_count(tool_name);
            if used >= u64::from(max_calls) {
                return Err(ToolError::MaxCallsExceeded(format!(
                    "tool '{tool_name}' has been called {used} times, the limit for this task \
                     is {max_calls}; do not call this tool again in this session"
                )));
            }
        }

        let arguments = parse_arguments(args)?;

        let workspace = CallWorkspace::new(self.scratch_root.as_deref())
            .map_err(|e| ToolError::Internal(format!("failed to create call workspace: {e}")))?;
        let mounts = self.stage_inputs(&tool, &workspace, &arguments, auxiliary)?;

        let spec = ContainerSpec {
            image: tool.config.image.clone(),
            cmd: tool.config.cmd.clone(),
            env: tool.config.env_list(),
            mounts,
            memory_bytes: tool.memory_limit_bytes(),
            nano_cpus: tool.nano_cpus(self.runtime.host_cpus()),
        };

        let name = container_name(tool_name);
        let id = self.runtime.create(&name, &spec).await.map_err(|e| {
            ToolError::Internal(format!(
                "failed to create container from image '{}': {e}",
                spec.image
            ))
        })?;
        let mut container = ContainerGuard::new(Arc::clone(&self.runtime), id);

        let outcome = self.run_container(cancel, &tool, container.id()).await;
        container.release().await;
        outcome
    }

    async fn run_container(
        &self,
        cancel: &CancellationToken,
        tool: &DockerTool,
        id: &str,
    ) -> ToolResult<String> {
        let started = Instant::now();
        let run = async {
            self.runtime.start(id).await.map_err(WaitFailure::Start)?;
            self.runtime.wait(id).await.map_err(WaitFailure::Wait)
        };
        let bounded = async {
            match tool.timeout {
                Some(limit) => tokio::time::timeout(limit, run)
                    .await
                    .unwrap_or(Err(WaitFailure::TimedOut)),
                None => run.await,
            }
        };
        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WaitFailure::Cancelled),
            res = bounded => res,
        };

        let elapsed = started.elapsed();
        self.usage.record(tool.name(), elapsed);

        let exit_code = match waited {
            Ok(code) => code,
            Err(failure) => {
                obs::emit_tool_executed(tool.name(), duration_ms(elapsed), None, false);
                return Err(failure.into_tool_error(tool.timeout));
            }
        };
        obs::emit_tool_executed(
            tool.name(),
            duration_ms(elapsed),
            Some(exit_code),
            exit_code == 0,
        );

        if exit_code != 0 {
            let message = match self.runtime.logs(id, LogStreams::Combined).await {
                Ok(logs) if !logs.trim().is_empty() => {
                    format!("tool container exited with code {exit_code}: {}", logs.trim())
                }
                Ok(_) => format!("tool container exited with code {exit_code}"),
                Err(err) => {
                    warn!(container = %id, error = %err, "failed to read logs of failed tool container");
                    format!("tool container exited with code {exit_code}")
                }
            };
            return Err(ToolError::ExecutionFailed(message));
        }

        let stdout = self
            .runtime
            .logs(id, LogStreams::StdoutOnly)
            .await
            .map_err(|e| ToolError::Internal(format!("failed to read tool output: {e}")))?;
        let output = stdout.trim();
        if output.is_empty() {
            return Err(ToolError::ExecutionFailed("tool returned no output".to_string()));
        }
        Ok(output.to_string())
    }

    fn stage_inputs(
        &self,
        tool: &DockerTool,
        workspace: &CallWorkspace,
        arguments: &Map<String, Value>,
        auxiliary: &BTreeMap<String, Vec<u8>>,
    ) -> ToolResult<Vec<BindMount>> {
        let staging_error =
            |e: std::io::Error| ToolError::Internal(format!("failed to stage tool input: {e}"));
        let mut mounts = Vec::new();

        for (argument, target) in &tool.config.parameter_files {
            let Some(value) = arguments.get(argument) else {
                continue;
            };
            let contents = match value {
                Value::String(text) => text.clone(),
                other => serde_json::to_string(other).map_err(|e| {
                    ToolError::InvalidArguments(format!(
                        "failed to serialize argument '{argument}': {e}"
                    ))
                })?,
            };
            let source = workspace
                .stage(argument, contents.as_bytes())
                .map_err(staging_error)?;
            mounts.push(BindMount::read_only(source, target.clone()));
        }

        if !auxiliary.is_empty() {
            match &tool.config.auxiliary_dir {
                Some(dir) => {
                    let mut targets = BTreeMap::new();
                    for (name, data) in auxiliary {
                        let base = Path::new(name)
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_else(|| sanitize(name));
                        let target = format!("{}/{}", dir.trim_end_matches('/'), base);
                        if let Some(other) = targets.insert(target.clone(), name) {
                            return Err(ToolError::Internal(format!(
                                "auxiliary files '{other}' and '{name}' would both be mounted \
                                 at {target}"
                            )));
                        }
                        let source = workspace.stage(&base, data).map_err(staging_error)?;
                        mounts.push(BindMount::read_only(source, target));
                    }
                }
                None => debug!(
                    files = auxiliary.len(),
                    "tool has no auxiliary directory, auxiliary data not mounted"
                ),
            }
        }

        if let Some(target) = &tool.config.shared_dir {
            let path = self.shared_dir()?;
            mounts.push(BindMount::read_write(path, target.clone()));
        }

        Ok(mounts)
    }

    /// Shared directory for this executor, created on first use.
    pub fn shared_dir(&self) -> ToolResult<PathBuf> {
        self.shared_dir
            .get_or_create(self.scratch_root.as_deref())
            .map_err(|e| ToolError::Internal(format!("failed to create shared directory: {e}")))
    }

    /// Calls left before `tool` hits its budget; `None` when unlimited or
    /// not registered.
    pub fn remaining_calls(&self, tool: &str) -> Option<u64> {
        let max_calls = self.registry.get(tool)?.max_calls?;
        Some(u64::from(max_calls).saturating_sub(self.usage.call_count(tool)))
    }

    /// Snapshot of per-tool usage.
    pub fn usage_stats(&self) -> BTreeMap<String, ToolUsage> {
        self.usage.snapshot()
    }

    /// Remove the shared directory and close the runtime connection.
    ///
    /// Both are attempted even if the first fails.
    pub async fn close(&self) -> ToolResult<()> {
        let dir = self.shared_dir.close();
        let runtime = self.runtime.close().await;
        dir.map_err(|e| ToolError::Internal(format!("failed to remove shared directory: {e}")))?;
        runtime.map_err(|e| {
            ToolError::Internal(format!("failed to close container runtime: {e}"))
        })?;
        Ok(())
    }
}

/// Usage of an optional executor; runs that never needed tools report none.
pub fn usage_stats_of<R: ContainerRuntime>(
    executor: Option<&DockerToolExecutor<R>>,
) -> BTreeMap<String, ToolUsage> {
    executor.map(|e| e.usage_stats()).unwrap_or_default()
}

fn parse_arguments(raw: &str) -> ToolResult<Map<String, Value>> {
    serde_json::from_str::<Map<String, Value>>(raw).map_err(|err| {
        ToolError::InvalidArguments(format!(
            "failed to parse input arguments as JSON object: {err} (arguments: {raw})"
        ))
    })
}

fn container_name(tool_name: &str) -> String {
    format!("mb-{}-{}", sanitize(tool_name), Uuid::new_v4().simple())
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

enum WaitFailure {
    Cancelled,
    TimedOut,
    Start(RuntimeError),
    Wait(RuntimeError),
}

impl WaitFailure {
    fn into_tool_error(self, timeout: Option<Duration>) -> ToolError {
        match self {
            WaitFailure::TimedOut => ToolError::Timeout(format!(
                "execution timed out after {}",
                humantime::format_duration(timeout.unwrap_or_default())
            )),
            WaitFailure::Cancelled => ToolError::Internal("execution was cancelled".to_string()),
            WaitFailure::Start(err) => {
                ToolError::Internal(format!("failed to start tool container: {err}"))
            }
            WaitFailure::Wait(err) => {
                ToolError::Internal(format!("failed waiting for tool container: {err}"))
            }
        }
    }
}

/// Removes its container on [`release`], or from `Drop` when the owning
/// future is abandoned mid-call.
///
/// [`release`]: ContainerGuard::release
struct ContainerGuard<R: ContainerRuntime> {
    runtime: Arc<R>,
    id: Option<String>,
}

impl<R: ContainerRuntime> ContainerGuard<R> {
    fn new(runtime: Arc<R>, id: String) -> Self {
        Self {
            runtime,
            id: Some(id),
        }
    }

    fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    async fn release(&mut self) {
        if let Some(id) = self.id.take() {
            remove_container(self.runtime.as_ref(), &id).await;
        }
    }
}

impl<R: ContainerRuntime> Drop for ContainerGuard<R> {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let runtime = Arc::clone(&self.runtime);
                handle.spawn(async move {
                    remove_container(runtime.as_ref(), &id).await;
                });
            }
            Err(_) => warn!(container = %id, "no async runtime to remove abandoned tool container"),
        }
    }
}

async fn remove_container<R: ContainerRuntime>(runtime: &R, id: &str) {
    match runtime.remove(id).await {
        Ok(()) => debug!(container = %id, "removed tool container"),
        Err(err) if err.is_gone() => debug!(container = %id, "tool container already removed"),
        Err(err) => obs::emit_container_cleanup_failed(id, &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments_requires_object() {
        assert!(parse_arguments(r#"{"input": "x"}"#).is_ok());

        for raw in ["[]", "42", "\"text\"", "{not json", ""] {
            let err = parse_arguments(raw).unwrap_err();
            assert!(matches!(err, ToolError::InvalidArguments(_)), "{raw}");
            assert!(err.to_string().starts_with(
                "invalid tool arguments: failed to parse input arguments as JSON object"
            ));
            assert!(err.to_string().contains(raw));
        }
    }

    #[test]
    fn test_container_names_are_unique_and_valid() {
        let a = container_name("web search");
        let b = container_name("web search");
        assert_ne!(a, b);
        assert!(a.starts_with("mb-web_search-"));
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')));
    }

    #[test]
    fn test_timeout_message_uses_configured_limit() {
        let err = WaitFailure::TimedOut.into_tool_error(Some(Duration::from_millis(50)));
        assert_eq!(
            err.to_string(),
            "tool execution timeout: execution timed out after 50ms"
        );
    }
}
