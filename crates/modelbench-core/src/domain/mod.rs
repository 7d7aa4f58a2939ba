//! Domain models for modelbench.
//!
//! - `Task`: a prompt, its expected answer and the tools it may call
//! - `RunConfig`: model binding, retry policy and rate limit for a run
//! - `TaskResult`: what a run produced, kept even when the run fails
//! - `ProviderError` / `RunFailure`: provider-level error taxonomy

pub mod error;
pub mod result;
pub mod run_config;
pub mod task;

pub use error::{ApiStatusError, BoxError, ProviderError, RunFailure};
pub use result::{FinalAnswer, TaskResult, TokenUsage, ToolUsage, Usage};
pub use run_config::{RetryPolicy, RunConfig};
pub use task::{Task, TaskTool};
