//! Decoding of the model's final turn into a [`TaskResult`].

use serde::Deserialize;
use serde_json::Value;

use crate::domain::{FinalAnswer, ProviderError, TaskResult};

/// Shape requested from the model in structured-output mode.
#[derive(Debug, Deserialize)]
struct StructuredAnswer {
    #[serde(default)]
    title: String,
    #[serde(default)]
    explanation: String,
    final_answer: Value,
}

/// Remove a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line.
    match body.split_once('\n') {
        Some((_, inner)) => inner.trim(),
        None => body.trim(),
    }
}

/// Store the final turn's content in `result`.
///
/// Structured mode expects a JSON object with `title`, `explanation` and
/// `final_answer`; a string `final_answer` is kept as text. Otherwise the
/// trimmed content itself is the answer.
pub fn apply_final_answer(
    result: &mut TaskResult,
    content: &str,
    structured: bool,
) -> Result<(), ProviderError> {
    if !structured {
        result.final_answer = FinalAnswer::Text(content.trim().to_string());
        return Ok(());
    }

    let answer: StructuredAnswer = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| {
            ProviderError::InvalidResponse(format!("failed to decode structured answer: {e}"))
        })?;
    result.title = answer.title;
    result.explanation = answer.explanation;
    result.final_answer = match answer.final_answer {
        Value::String(text) => FinalAnswer::Text(text),
        other => FinalAnswer::Structured(other),
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json"), "```json");
    }

    #[test]
    fn test_structured_answer() {
        let mut result = TaskResult::new();
        apply_final_answer(
            &mut result,
            "```json\n{\"title\":\"Sum\",\"explanation\":\"2+2\",\"final_answer\":{\"value\":4}}\n```",
            true,
        )
        .unwrap();

        assert_eq!(result.title, "Sum");
        assert_eq!(result.explanation, "2+2");
        assert_eq!(result.final_answer, FinalAnswer::Structured(json!({"value": 4})));
    }

    #[test]
    fn test_structured_string_answer_is_text() {
        let mut result = TaskResult::new();
        apply_final_answer(&mut result, r#"{"final_answer":"Paris"}"#, true).unwrap();
        assert_eq!(result.final_answer, FinalAnswer::Text("Paris".into()));
        assert!(result.title.is_empty());
    }

    #[test]
    fn test_malformed_structured_answer() {
        let mut result = TaskResult::new();
        let err = apply_final_answer(&mut result, "the answer is 4", true).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn test_unstructured_answer_is_trimmed_text() {
        let mut result = TaskResult::new();
        apply_final_answer(&mut result, "  42\n", false).unwrap();
        assert_eq!(result.final_answer, FinalAnswer::Text("42".into()));
    }
}
