//! Structured tracing events for tool calls and task attempts.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use modelbench_core::fakes::{ContainerScript, FakeRuntime, ScriptedProvider};
use modelbench_core::obs::{
    emit_attempt_failed, emit_container_cleanup_failed, emit_retry_scheduled,
    emit_task_finished, emit_tool_executed, TaskSpan,
};
use modelbench_core::{
    DockerTool, DockerToolExecutor, Executor, RetryPolicy, RunConfig, Task, ToolConfig,
};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emit_tool_executed() {
    emit_tool_executed("echo", 42, Some(0), true);
    assert!(logs_contain("tool.executed"));
    assert!(logs_contain("duration_ms=42"));
}

#[traced_test]
#[test]
fn test_emit_cleanup_failed_is_warning() {
    emit_container_cleanup_failed("abc123", &"daemon unreachable");
    assert!(logs_contain("WARN"));
    assert!(logs_contain("tool.cleanup_failed"));
    assert!(logs_contain("daemon unreachable"));
}

#[traced_test]
#[test]
fn test_emit_retry_scheduled_formats_delay() {
    emit_retry_scheduled(2, Duration::from_millis(1500));
    assert!(logs_contain("attempt.retry_scheduled"));
    assert!(logs_contain("next retry in 1s 500ms"));
}

#[traced_test]
#[test]
fn test_emit_attempt_failed_and_task_finished() {
    let _span = TaskSpan::enter("sum", "scripted");
    emit_attempt_failed(1, true, &"overloaded");
    emit_task_finished("scripted", 10, false);
    assert!(logs_contain("attempt.failed"));
    assert!(logs_contain("task.finished"));
    assert!(logs_contain("modelbench.task"));
}

#[traced_test]
#[tokio::test]
async fn test_tool_call_emits_executed_event() {
    let runtime = FakeRuntime::new().with_image("img", ContainerScript::success("{}"));
    let executor = DockerToolExecutor::new(runtime);
    executor.register_tool(DockerTool::new(ToolConfig::new("echo", "img")));

    executor
        .execute_tool(&CancellationToken::new(), "echo", "{}", &BTreeMap::new())
        .await
        .unwrap();

    assert!(logs_contain("tool.executed"));
    assert!(logs_contain("exit_code=0"));
}

#[traced_test]
#[tokio::test]
async fn test_retrying_executor_logs_attempts() {
    let provider = Arc::new(ScriptedProvider::flaky(1, "4"));
    let config = RunConfig::new("m").with_retry_policy(RetryPolicy {
        max_retry_attempts: 1,
        initial_delay_seconds: 0,
        max_delay_seconds: 0,
    });
    let executor = Executor::new(provider, config);

    executor
        .execute(&CancellationToken::new(), &Task::new("sum", "2 + 2?"))
        .await
        .unwrap();

    assert!(logs_contain("attempt.failed"));
    assert!(logs_contain("attempt.retry_scheduled"));
    assert!(logs_contain("task.finished"));
}
