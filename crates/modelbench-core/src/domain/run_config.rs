//! Per-run provider configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Retry behaviour for transient provider failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = this + 1).
    pub max_retry_attempts: u32,

    /// Delay before the first retry; doubles on every further retry.
    pub initial_delay_seconds: u64,

    /// Upper bound for a single backoff delay.
    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: u64,
}

fn default_max_delay_seconds() -> u64 {
    60
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            initial_delay_seconds: 1,
            max_delay_seconds: default_max_delay_seconds(),
        }
    }
}

/// Settings that bind a provider to one model for a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunConfig {
    pub model: String,

    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,

    /// Request budget per minute; 0 disables rate limiting.
    #[serde(default)]
    pub max_requests_per_minute: u32,

    /// Ask the model for a structured (JSON object) final answer.
    #[serde(default)]
    pub structured_output: bool,

    /// Opaque provider-specific parameters (temperature, reasoning effort, ...).
    #[serde(default)]
    pub provider_params: Map<String, Value>,
}

impl RunConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_max_requests_per_minute(mut self, rpm: u32) -> Self {
        self.max_requests_per_minute = rpm;
        self
    }
}
