//! Executor retry, metadata and cancellation behaviour.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use modelbench_core::fakes::ScriptedProvider;
use modelbench_core::{
    Executor, FinalAnswer, Provider, ProviderError, RetryPolicy, RunConfig, RunFailure, Task,
    TaskResult, TokenUsage,
};
use tokio_util::sync::CancellationToken;

fn task() -> Task {
    Task::new("sum", "What is 2 + 2?").with_expected("4")
}

fn config(max_retry_attempts: u32, initial_delay_seconds: u64) -> RunConfig {
    RunConfig::new("test-model").with_retry_policy(RetryPolicy {
        max_retry_attempts,
        initial_delay_seconds,
        max_delay_seconds: 60,
    })
}

#[tokio::test]
async fn test_retryable_failures_within_budget_succeed() {
    let provider = Arc::new(ScriptedProvider::flaky(2, "4"));
    let executor = Executor::new(provider.clone(), config(2, 0));

    let result = executor.execute(&CancellationToken::new(), &task()).await.unwrap();

    assert_eq!(provider.calls(), 3);
    assert_eq!(result.final_answer, FinalAnswer::Text("4".into()));
    assert_eq!(result.prompts(), ["What is 2 + 2? (attempt 3)"]);
}

#[tokio::test]
async fn test_exhausted_retries_return_last_error_unwrapped() {
    let provider = Arc::new(ScriptedProvider::flaky(3, "4"));
    let executor = Executor::new(provider.clone(), config(2, 0));

    let failure = executor.execute(&CancellationToken::new(), &task()).await.unwrap_err();

    assert_eq!(provider.calls(), 3);
    assert!(failure.is_retryable());
    assert_eq!(
        failure.to_string(),
        "retryable error: provider api error (status 503): attempt 3 failed"
    );
    assert_eq!(failure.partial.prompts(), ["What is 2 + 2? (attempt 3)"]);
}

#[tokio::test]
async fn test_fatal_error_stops_immediately_with_metadata() {
    let provider = Arc::new(ScriptedProvider::broken());
    let executor = Executor::new(provider.clone(), config(5, 0));

    let failure = executor.execute(&CancellationToken::new(), &task()).await.unwrap_err();

    assert_eq!(provider.calls(), 1);
    assert!(matches!(
        failure.error,
        ProviderError::Api { status: 400, .. }
    ));
    assert!(!failure.partial.prompts().is_empty());
    assert_eq!(failure.partial.usage.input_tokens, Some(7));
}

#[tokio::test]
async fn test_without_policy_exactly_one_attempt() {
    let provider = Arc::new(ScriptedProvider::flaky(1, "4"));
    let executor = Executor::new(provider.clone(), RunConfig::new("test-model"));

    let failure = executor.execute(&CancellationToken::new(), &task()).await.unwrap_err();

    assert_eq!(provider.calls(), 1);
    assert!(failure.is_retryable());
    assert_eq!(failure.partial.usage.input_tokens, Some(7));
}

#[tokio::test(start_paused = true)]
async fn test_notify_hook_sees_exponential_delays() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let provider = Arc::new(ScriptedProvider::flaky(3, "4"));
    let executor = Executor::new(provider.clone(), config(3, 1))
        .with_jitter(false)
        .with_retry_notify(move |attempt, delay, err| {
            assert!(err.is_retryable());
            sink.lock().unwrap().push((attempt, delay));
        });

    executor.execute(&CancellationToken::new(), &task()).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (2, Duration::from_secs(1)),
            (3, Duration::from_secs(2)),
            (4, Duration::from_secs(4)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_keeps_last_attempt() {
    let provider = Arc::new(ScriptedProvider::flaky(5, "4"));
    let executor = Executor::new(provider.clone(), config(5, 60));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let failure = executor.execute(&cancel, &task()).await.unwrap_err();

    assert!(matches!(failure.error, ProviderError::Cancelled));
    assert!(!failure.is_retryable());
    assert_eq!(provider.calls(), 1);
    assert_eq!(failure.partial.prompts(), ["What is 2 + 2? (attempt 1)"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_attempt_is_not_retried() {
    let provider =
        Arc::new(ScriptedProvider::succeeding("4").with_run_time(Duration::from_secs(30)));
    let executor = Executor::new(provider.clone(), config(3, 0));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let failure = executor.execute(&cancel, &task()).await.unwrap_err();

    assert_eq!(failure.to_string(), "operation cancelled");
    assert_eq!(provider.calls(), 1);
    assert!(!failure.partial.prompts().is_empty());
}

/// Waits for cancellation, then needs a few more polls to wind down.
struct SlowUnwindProvider {
    unwound: Mutex<bool>,
}

#[async_trait]
impl Provider for SlowUnwindProvider {
    fn name(&self) -> &str {
        "slow-unwind"
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        _config: &RunConfig,
        task: &Task,
    ) -> Result<TaskResult, RunFailure> {
        let mut result = TaskResult::new();
        result.record_prompt(task.prompt.clone());
        result.usage.add_tokens(TokenUsage {
            input_tokens: 3,
            output_tokens: 0,
        });
        cancel.cancelled().await;
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        *self.unwound.lock().unwrap() = true;
        Err(RunFailure::new(result, ProviderError::Cancelled))
    }
}

#[tokio::test]
async fn test_cancel_waits_for_provider_to_unwind() {
    let provider = Arc::new(SlowUnwindProvider {
        unwound: Mutex::new(false),
    });
    let executor = Executor::new(provider.clone(), config(3, 0));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let failure = executor.execute(&cancel, &task()).await.unwrap_err();

    assert!(matches!(failure.error, ProviderError::Cancelled));
    assert_eq!(failure.partial.prompts(), ["What is 2 + 2?"]);
    assert_eq!(failure.partial.usage.input_tokens, Some(3));
    assert!(*provider.unwound.lock().unwrap());
}

#[tokio::test]
async fn test_rate_limited_executor_runs_tasks() {
    let provider = Arc::new(ScriptedProvider::flaky(1, "4"));
    let executor = Executor::new(
        provider.clone(),
        config(1, 0).with_max_requests_per_minute(6000),
    );

    let result = executor.execute(&CancellationToken::new(), &task()).await.unwrap();

    assert_eq!(provider.calls(), 2);
    assert_eq!(result.usage.input_tokens, Some(7));
}

#[tokio::test]
async fn test_cancel_while_throttled() {
    let provider = Arc::new(ScriptedProvider::succeeding("4"));
    let executor = Executor::new(
        provider.clone(),
        RunConfig::new("test-model").with_max_requests_per_minute(1),
    );
    let cancel = CancellationToken::new();

    executor.execute(&cancel, &task()).await.unwrap();
    cancel.cancel();
    let failure = executor.execute(&cancel, &task()).await.unwrap_err();

    assert!(matches!(failure.error, ProviderError::Cancelled));
    assert_eq!(provider.calls(), 1);
}
