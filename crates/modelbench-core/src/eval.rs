//! Scoring of task results against expected answers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{FinalAnswer, RunFailure, Task, TaskResult, Usage};

/// Outcome of one task on one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub task: String,
    pub passed: bool,
    pub expected: Value,
    pub actual: FinalAnswer,
    /// Set when the run itself failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub usage: Usage,
}

/// Compare a completed run with the task's expected result.
pub fn evaluate(task: &Task, result: &TaskResult) -> Evaluation {
    Evaluation {
        task: task.name.clone(),
        passed: answer_matches(&task.expected_result, &result.final_answer),
        expected: task.expected_result.clone(),
        actual: result.final_answer.clone(),
        error: None,
        duration_ms: u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
        usage: result.usage.clone(),
    }
}

/// A failed run never passes; its partial usage is still reported.
pub fn evaluate_failure(task: &Task, failure: &RunFailure) -> Evaluation {
    Evaluation {
        passed: false,
        error: Some(failure.to_string()),
        ..evaluate(task, &failure.partial)
    }
}

/// Expected strings match text answers trimmed and case-insensitively.
/// Other expected values match structurally, with text answers parsed as
/// JSON first (so `4` matches `"4"`). A null expectation matches nothing.
pub fn answer_matches(expected: &Value, actual: &FinalAnswer) -> bool {
    match (expected, actual) {
        (Value::Null, _) => false,
        (Value::String(want), FinalAnswer::Text(got)) => {
            want.trim().to_lowercase() == got.trim().to_lowercase()
        }
        (want, FinalAnswer::Structured(got)) => want == got,
        (want, FinalAnswer::Text(got)) => serde_json::from_str::<Value>(got.trim())
            .map(|parsed| &parsed == want)
            .unwrap_or(false),
    }
}

/// Per-model summary over a set of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub model: String,
    pub evaluated_at: DateTime<Utc>,
    pub evaluations: Vec<Evaluation>,
}

impl EvalReport {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            evaluated_at: Utc::now(),
            evaluations: Vec::new(),
        }
    }

    pub fn record(&mut self, evaluation: Evaluation) {
        self.evaluations.push(evaluation);
    }

    pub fn passed(&self) -> usize {
        self.evaluations.iter().filter(|e| e.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.evaluations.len() - self.passed()
    }

    /// Fraction of tasks passed; 0.0 for an empty report.
    pub fn pass_rate(&self) -> f64 {
        if self.evaluations.is_empty() {
            return 0.0;
        }
        self.passed() as f64 / self.evaluations.len() as f64
    }

    /// Input and output tokens summed over every evaluation.
    pub fn total_tokens(&self) -> (u64, u64) {
        self.evaluations.iter().fold((0, 0), |(input, output), e| {
            (
                input + e.usage.input_tokens.unwrap_or(0),
                output + e.usage.output_tokens.unwrap_or(0),
            )
        })
    }
}
