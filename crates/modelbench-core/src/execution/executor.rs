//! Task execution with rate limiting and retry of transient provider errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::domain::{ProviderError, RunConfig, RunFailure, Task, TaskResult};
use crate::obs;

use super::provider::Provider;
use super::rate_limit::RequestLimiter;
use super::retry::Backoff;

/// Called before each backoff wait with the upcoming attempt number, the
/// delay about to be waited and the error that triggered the retry.
pub type RetryNotify = Arc<dyn Fn(u32, Duration, &ProviderError) + Send + Sync>;

/// Runs tasks on one provider under one [`RunConfig`].
pub struct Executor {
    provider: Arc<dyn Provider>,
    run_config: RunConfig,
    limiter: Option<RequestLimiter>,
    notify: RetryNotify,
    jitter: bool,
}

impl Executor {
    /// Rate limiting is enabled only when `max_requests_per_minute > 0`.
    pub fn new(provider: Arc<dyn Provider>, run_config: RunConfig) -> Self {
        let limiter = RequestLimiter::per_minute(run_config.max_requests_per_minute);
        Self {
            provider,
            run_config,
            limiter,
            notify: Arc::new(|attempt, delay, _| obs::emit_retry_scheduled(attempt, delay)),
            jitter: true,
        }
    }

    /// Replace the hook invoked before every retry wait.
    pub fn with_retry_notify<F>(mut self, notify: F) -> Self
    where
        F: Fn(u32, Duration, &ProviderError) + Send + Sync + 'static,
    {
        self.notify = Arc::new(notify);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run_config
    }

    /// Run `task`, retrying retryable failures per the run's retry policy.
    ///
    /// Without a policy exactly one attempt is made. With one, at most
    /// `max_retry_attempts + 1`. The returned result (or the failure's
    /// partial result) is always the one produced by the last attempt made,
    /// and a failure carries that attempt's error unchanged. Cancellation
    /// while throttled or backing off yields [`ProviderError::Cancelled`].
    #[instrument(
        name = "execute",
        skip(self, cancel, task),
        fields(provider = %self.provider.name(), task = %task.name, model = %self.run_config.model)
    )]
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        task: &Task,
    ) -> Result<TaskResult, RunFailure> {
        let started = Instant::now();
        let outcome = self.execute_attempts(cancel, task).await;
        obs::emit_task_finished(
            self.provider.name(),
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            outcome.is_ok(),
        );
        outcome
    }

    async fn execute_attempts(
        &self,
        cancel: &CancellationToken,
        task: &Task,
    ) -> Result<TaskResult, RunFailure> {
        let policy = self.run_config.retry_policy.as_ref();
        let max_attempts = policy.map_or(1, |p| p.max_retry_attempts.saturating_add(1));
        let backoff = policy.map(|p| Backoff::from_policy(p).with_jitter(self.jitter));

        let mut last = TaskResult::default();
        let mut attempt = 1;
        loop {
            if let Some(limiter) = &self.limiter {
                if let Err(err) = limiter.acquire(cancel).await {
                    return Err(RunFailure::new(last, err));
                }
            }

            debug!(attempt, max_attempts, "starting attempt");
            let failure = match self.run_attempt(cancel, task).await {
                Ok(result) => return Ok(result),
                Err(failure) => failure,
            };
            let retryable = failure.is_retryable();
            obs::emit_attempt_failed(attempt, retryable, &failure.error);

            let Some(backoff) = backoff.filter(|_| retryable && attempt < max_attempts) else {
                return Err(failure);
            };

            let delay = backoff.delay(attempt);
            (self.notify)(attempt + 1, delay, &failure.error);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RunFailure::new(failure.partial, ProviderError::Cancelled));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            last = failure.partial;
            attempt += 1;
        }
    }

    async fn run_attempt(
        &self,
        cancel: &CancellationToken,
        task: &Task,
    ) -> Result<TaskResult, RunFailure> {
        // Not raced against `cancel`: the provider observes it and must get to
        // return its partial result and release its tools.
        let outcome = self.provider.run(cancel, &self.run_config, task).await;
        match outcome {
            Err(failure) if cancel.is_cancelled() => {
                Err(RunFailure::new(failure.partial, ProviderError::Cancelled))
            }
            other => other,
        }
    }

    pub async fn close(&self) -> Result<(), ProviderError> {
        self.provider.close().await
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("provider", &self.provider.name())
            .field("run_config", &self.run_config)
            .field("limiter", &self.limiter)
            .finish()
    }
}
