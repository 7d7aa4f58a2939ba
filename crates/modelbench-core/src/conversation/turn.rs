//! Provider-neutral shapes of one conversation turn.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::TokenUsage;
use crate::sandbox::ToolConfig;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned id that ties the result back to the request.
    pub id: String,
    pub name: String,
    /// Raw argument text as produced by the model.
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// One model response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl ModelTurn {
    /// A final answer turn.
    pub fn answer(content: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            usage,
        }
    }

    /// A turn requesting tool calls.
    pub fn calls(tool_calls: Vec<ToolCall>, usage: TokenUsage) -> Self {
        Self {
            content: String::new(),
            tool_calls,
            usage,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Whether the model may call tools on its next turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
}

/// A tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

impl From<&ToolConfig> for ToolDefinition {
    fn from(config: &ToolConfig) -> Self {
        Self {
            name: config.name.clone(),
            description: config.description.clone(),
            parameters: config.parameters.clone(),
        }
    }
}
