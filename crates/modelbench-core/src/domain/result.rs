//! Accumulated outcome of one provider run.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The model's final answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FinalAnswer {
    /// Free-text answer (unstructured response mode).
    Text(String),
    /// Answer decoded from a structured response.
    Structured(Value),
}

impl Default for FinalAnswer {
    fn default() -> Self {
        FinalAnswer::Text(String::new())
    }
}

impl FinalAnswer {
    pub fn is_empty(&self) -> bool {
        match self {
            FinalAnswer::Text(text) => text.is_empty(),
            FinalAnswer::Structured(value) => value.is_null(),
        }
    }
}

/// Token counts reported by a single model response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Per-tool invocation statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub call_count: u64,
    pub total_time_ns: u64,
}

impl ToolUsage {
    pub fn total_time(&self) -> Duration {
        Duration::from_nanos(self.total_time_ns)
    }
}

/// Aggregated usage across all turns of a run.
///
/// Token counts stay `None` until the first model response reports usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tools: BTreeMap<String, ToolUsage>,
}

impl Usage {
    pub fn add_tokens(&mut self, turn: TokenUsage) {
        *self.input_tokens.get_or_insert(0) += turn.input_tokens;
        *self.output_tokens.get_or_insert(0) += turn.output_tokens;
    }
}

/// Result of running one task against one provider.
///
/// A failed attempt still produces one of these (see
/// [`RunFailure`](crate::domain::RunFailure)) holding whatever was gathered
/// before the failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub title: String,
    pub explanation: String,
    pub final_answer: FinalAnswer,
    /// Model time, summed across the conversation turns of the attempt.
    pub duration: Duration,
    prompts: Vec<String>,
    pub usage: Usage,
}

impl TaskResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a prompt that was actually sent to the model.
    pub fn record_prompt(&mut self, prompt: impl Into<String>) {
        self.prompts.push(prompt.into());
    }

    /// Prompts in the order they were sent.
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    pub fn add_duration(&mut self, elapsed: Duration) {
        self.duration += elapsed;
    }
}
