//! Structured lifecycle events for task runs and tool calls.
//!
//! Every event carries a stable `event` field so log pipelines can select
//! them without parsing messages:
//! - `tool.executed`, `tool.cleanup_failed`
//! - `attempt.failed`, `attempt.retry_scheduled`
//! - `task.finished`

use std::time::Duration;

use tracing::{info, warn};

/// RAII guard that keeps a task-scoped span entered.
///
/// ```ignore
/// let _span = TaskSpan::enter("sum-of-primes", "openai");
/// ```
///
/// Only for synchronous sections; async code should use
/// `tracing::Instrument` with [`task_span`].
pub struct TaskSpan {
    _span: tracing::span::EnteredSpan,
}

impl TaskSpan {
    pub fn enter(task: &str, provider: &str) -> Self {
        Self {
            _span: task_span(task, provider).entered(),
        }
    }
}

/// The `modelbench.task` span for one task on one provider.
pub fn task_span(task: &str, provider: &str) -> tracing::Span {
    tracing::info_span!("modelbench.task", task = %task, provider = %provider)
}

pub fn emit_tool_executed(tool: &str, duration_ms: u64, exit_code: Option<i64>, success: bool) {
    info!(
        event = "tool.executed",
        tool = %tool,
        duration_ms = duration_ms,
        exit_code = exit_code,
        success = success,
    );
}

/// Container removal failed for a reason other than it already being gone.
pub fn emit_container_cleanup_failed(container: &str, error: &dyn std::fmt::Display) {
    warn!(event = "tool.cleanup_failed", container = %container, error = %error);
}

pub fn emit_attempt_failed(attempt: u32, retryable: bool, error: &dyn std::fmt::Display) {
    warn!(
        event = "attempt.failed",
        attempt = attempt,
        retryable = retryable,
        error = %error,
    );
}

/// A retry is about to wait `delay` before attempt `next_attempt`.
pub fn emit_retry_scheduled(next_attempt: u32, delay: Duration) {
    info!(
        event = "attempt.retry_scheduled",
        attempt = next_attempt,
        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        "next retry in {}",
        humantime::format_duration(Duration::from_millis(
            u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
        )),
    );
}

pub fn emit_task_finished(provider: &str, duration_ms: u64, success: bool) {
    info!(
        event = "task.finished",
        provider = %provider,
        duration_ms = duration_ms,
        success = success,
    );
}
