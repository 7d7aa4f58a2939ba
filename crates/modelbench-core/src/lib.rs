//! modelbench core library
//!
//! Runs benchmark tasks against AI model providers: sandboxed tool execution
//! in Docker, a tool-calling conversation loop, and a retrying, rate-limited
//! task executor.

pub mod config;
pub mod conversation;
pub mod domain;
pub mod eval;
pub mod execution;
pub mod fakes;
pub mod obs;
pub mod sandbox;
pub mod telemetry;

pub use config::{BenchConfig, ConfigError};

pub use conversation::{
    run_conversation, ChatBackend, Conversation, ModelTurn, ToolCall, ToolCallingProvider,
    ToolChoice, ToolDefinition, ToolSession,
};

pub use domain::{
    FinalAnswer, ProviderError, RetryPolicy, RunConfig, RunFailure, Task, TaskResult, TaskTool,
    TokenUsage, ToolUsage, Usage,
};

pub use eval::{evaluate, evaluate_failure, EvalReport, Evaluation};

pub use execution::{Executor, Provider};

pub use sandbox::{
    ContainerRuntime, DockerRuntime, DockerTool, DockerToolExecutor, ToolConfig, ToolError,
    ToolResult,
};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
