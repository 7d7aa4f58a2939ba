//! In-memory fakes for the runtime and provider seams (testing only).
//!
//! - `FakeRuntime`: scripted containers, no Docker needed
//! - `ScriptedBackend`: a chat backend replaying canned model turns
//! - `ScriptedProvider`: a provider failing a set number of times

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::conversation::{
    ChatBackend, Conversation, ModelTurn, ToolCall, ToolChoice, ToolDefinition,
};
use crate::domain::{ProviderError, RunConfig, RunFailure, Task, TaskResult, TokenUsage};
use crate::execution::Provider;
use crate::sandbox::{ContainerRuntime, ContainerSpec, LogStreams, RuntimeError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

// ---------------------------------------------------------------------------
// FakeRuntime
// ---------------------------------------------------------------------------

/// Behaviour of every container created from one image.
#[derive(Debug, Clone, Default)]
pub struct ContainerScript {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    /// Wait never returns.
    pub hang: bool,
    /// Simulated run time before the container exits.
    pub run_time: Option<Duration>,
    pub fail_create: bool,
    pub fail_start: bool,
}

impl ContainerScript {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failure(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Default::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn with_run_time(mut self, run_time: Duration) -> Self {
        self.run_time = Some(run_time);
        self
    }
}

/// A container as it was created.
#[derive(Debug, Clone)]
pub struct CreatedContainer {
    pub id: String,
    pub name: String,
    pub spec: ContainerSpec,
    /// Contents of every bind-mounted regular file at create time, keyed by
    /// in-container path.
    pub mounted_files: BTreeMap<String, Vec<u8>>,
}

/// In-memory container engine.
#[derive(Debug)]
pub struct FakeRuntime {
    images: Mutex<HashSet<String>>,
    scripts: Mutex<HashMap<String, ContainerScript>>,
    live: Mutex<HashMap<String, ContainerScript>>,
    created: Mutex<Vec<CreatedContainer>>,
    removed: Mutex<Vec<String>>,
    next_id: AtomicU64,
    host_cpus: usize,
    remove_latency: Option<Duration>,
    closed: AtomicBool,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self {
            images: Mutex::default(),
            scripts: Mutex::default(),
            live: Mutex::default(),
            created: Mutex::default(),
            removed: Mutex::default(),
            next_id: AtomicU64::new(1),
            host_cpus: 4,
            remove_latency: None,
            closed: AtomicBool::new(false),
        }
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `image` present locally and script its containers.
    pub fn with_image(self, image: impl Into<String>, script: ContainerScript) -> Self {
        let image = image.into();
        lock(&self.images).insert(image.clone());
        lock(&self.scripts).insert(image, script);
        self
    }

    pub fn with_host_cpus(mut self, cpus: usize) -> Self {
        self.host_cpus = cpus;
        self
    }

    /// Every removal takes `latency`, like a round trip to a real engine.
    pub fn with_remove_latency(mut self, latency: Duration) -> Self {
        self.remove_latency = Some(latency);
        self
    }

    /// Replace the script for `image`.
    pub fn script(&self, image: &str, script: ContainerScript) {
        lock(&self.scripts).insert(image.to_string(), script);
    }

    pub fn created(&self) -> Vec<CreatedContainer> {
        lock(&self.created).clone()
    }

    pub fn removed(&self) -> Vec<String> {
        lock(&self.removed).clone()
    }

    /// Containers created but not yet removed.
    pub fn live_count(&self) -> usize {
        lock(&self.live).len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn live_script(&self, id: &str) -> Result<ContainerScript, RuntimeError> {
        lock(&self.live)
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))
    }
}

fn snapshot_mounts(spec: &ContainerSpec) -> BTreeMap<String, Vec<u8>> {
    spec.mounts
        .iter()
        .filter(|m| m.source.is_file())
        .filter_map(|m| {
            std::fs::read(&m.source)
                .ok()
                .map(|data| (m.target.clone(), data))
        })
        .collect()
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        Ok(lock(&self.images).contains(image))
    }

    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let script = lock(&self.scripts)
            .get(&spec.image)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("no such image: {}", spec.image)))?;
        if script.fail_create {
            return Err(RuntimeError::Api("create refused".into()));
        }

        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.created).push(CreatedContainer {
            id: id.clone(),
            name: name.to_string(),
            spec: spec.clone(),
            mounted_files: snapshot_mounts(spec),
        });
        lock(&self.live).insert(id.clone(), script);
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        if self.live_script(id)?.fail_start {
            return Err(RuntimeError::Api("start refused".into()));
        }
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        let script = self.live_script(id)?;
        if script.hang {
            std::future::pending::<()>().await;
        }
        if let Some(run_time) = script.run_time {
            tokio::time::sleep(run_time).await;
        }
        Ok(script.exit_code)
    }

    async fn logs(&self, id: &str, streams: LogStreams) -> Result<String, RuntimeError> {
        let script = self.live_script(id)?;
        Ok(match streams {
            LogStreams::StdoutOnly => script.stdout,
            LogStreams::Combined => format!("{}{}", script.stdout, script.stderr),
        })
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        if let Some(latency) = self.remove_latency {
            tokio::time::sleep(latency).await;
        }
        if lock(&self.live).remove(id).is_none() {
            return Err(RuntimeError::NotFound(format!("no such container: {id}")));
        }
        lock(&self.removed).push(id.to_string());
        Ok(())
    }

    fn host_cpus(&self) -> usize {
        self.host_cpus
    }

    async fn close(&self) -> Result<(), RuntimeError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedBackend
// ---------------------------------------------------------------------------

/// What a [`ScriptedConversation`] saw, shared with the test.
#[derive(Debug, Default)]
pub struct Transcript {
    /// Instructions and prompt of the last started conversation.
    pub system_prompt: Option<String>,
    pub prompt: String,
    pub structured_output: bool,
    pub tools_offered: Vec<String>,
    pub assistant_turns: Vec<ModelTurn>,
    /// `(call id, content)` in append order.
    pub tool_results: Vec<(String, String)>,
    pub tool_choices: Vec<ToolChoice>,
    pub sends: u32,
}

/// Chat backend whose model replays a fixed list of turns.
///
/// Every conversation started from it shares one turn queue and one
/// transcript.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    turns: Arc<Mutex<VecDeque<Result<ModelTurn, ProviderError>>>>,
    transcript: Arc<Mutex<Transcript>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, turn: ModelTurn) -> Self {
        lock(&self.turns).push_back(Ok(turn));
        self
    }

    pub fn then_fail(self, err: ProviderError) -> Self {
        lock(&self.turns).push_back(Err(err));
        self
    }

    /// Shorthand for a turn requesting one call.
    pub fn then_call(self, id: &str, tool: &str, arguments: &str) -> Self {
        self.then(ModelTurn::calls(
            vec![ToolCall::new(id, tool, arguments)],
            TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        ))
    }

    /// Shorthand for a final answer turn.
    pub fn then_answer(self, content: &str) -> Self {
        self.then(ModelTurn::answer(
            content,
            TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        ))
    }

    pub fn transcript(&self) -> MutexGuard<'_, Transcript> {
        lock(&self.transcript)
    }
}

/// Conversation over a [`ScriptedBackend`].
#[derive(Debug)]
pub struct ScriptedConversation {
    backend: ScriptedBackend,
}

impl ScriptedConversation {
    pub fn new(backend: ScriptedBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Conversation for ScriptedConversation {
    async fn send(&mut self, _cancel: &CancellationToken) -> Result<ModelTurn, ProviderError> {
        lock(&self.backend.transcript).sends += 1;
        lock(&self.backend.turns)
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::InvalidResponse("script exhausted".into())))
    }

    fn append_assistant_message(&mut self, turn: &ModelTurn) {
        lock(&self.backend.transcript)
            .assistant_turns
            .push(turn.clone());
    }

    fn append_tool_result(&mut self, call: &ToolCall, content: &str) {
        lock(&self.backend.transcript)
            .tool_results
            .push((call.id.clone(), content.to_string()));
    }

    fn set_tool_choice(&mut self, choice: ToolChoice) {
        lock(&self.backend.transcript).tool_choices.push(choice);
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    type Conversation = ScriptedConversation;

    fn name(&self) -> &str {
        "scripted"
    }

    fn start(
        &self,
        config: &RunConfig,
        task: &Task,
        tools: &[ToolDefinition],
    ) -> Result<ScriptedConversation, ProviderError> {
        let mut transcript = lock(&self.transcript);
        transcript.system_prompt = task.system_prompt.clone();
        transcript.prompt = task.prompt.clone();
        transcript.structured_output = config.structured_output;
        transcript.tools_offered = tools.iter().map(|t| t.name.clone()).collect();
        Ok(ScriptedConversation::new(self.clone()))
    }
}

// ---------------------------------------------------------------------------
// ScriptedProvider
// ---------------------------------------------------------------------------

/// Provider that fails its first `failures` runs, then answers.
///
/// Every run, failed or not, records the task prompt and 7 input tokens so
/// partial results can be checked.
#[derive(Debug)]
pub struct ScriptedProvider {
    failures: u32,
    retryable: bool,
    answer: String,
    calls: AtomicU32,
    run_time: Option<Duration>,
}

impl ScriptedProvider {
    pub fn succeeding(answer: impl Into<String>) -> Self {
        Self {
            failures: 0,
            retryable: true,
            answer: answer.into(),
            calls: AtomicU32::new(0),
            run_time: None,
        }
    }

    /// First `failures` runs fail with a retryable 503.
    pub fn flaky(failures: u32, answer: impl Into<String>) -> Self {
        Self {
            failures,
            ..Self::succeeding(answer)
        }
    }

    /// Every run fails with a non-retryable 400.
    pub fn broken() -> Self {
        Self {
            failures: u32::MAX,
            retryable: false,
            ..Self::succeeding("")
        }
    }

    /// Each run takes `run_time` (honouring cancellation).
    pub fn with_run_time(mut self, run_time: Duration) -> Self {
        self.run_time = Some(run_time);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        _config: &RunConfig,
        task: &Task,
    ) -> Result<TaskResult, RunFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut result = TaskResult::new();
        result.record_prompt(format!("{} (attempt {call})", task.prompt));
        result.usage.add_tokens(TokenUsage {
            input_tokens: 7,
            output_tokens: 0,
        });

        if let Some(run_time) = self.run_time {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RunFailure::new(result, ProviderError::Cancelled));
                }
                _ = tokio::time::sleep(run_time) => {}
            }
        }

        if call <= self.failures {
            let status = if self.retryable { 503 } else { 400 };
            let err = ProviderError::from_status(status, format!("attempt {call} failed"));
            return Err(RunFailure::new(result, err));
        }
        result.final_answer = crate::domain::FinalAnswer::Text(self.answer.clone());
        Ok(result)
    }
}
