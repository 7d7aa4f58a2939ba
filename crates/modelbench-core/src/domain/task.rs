//! Task definitions: a prompt, its expected answer, and the tools it may use.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-task policy for one tool.
///
/// Limits are task scoped: every task run builds fresh tool state from these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTool {
    /// Name of a tool in the configured catalogue.
    pub name: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maximum invocations within one run of the task.
    #[serde(default)]
    pub max_calls: Option<u32>,

    /// Wall-clock limit per invocation (milliseconds).
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub max_memory_mb: Option<u64>,

    /// CPU cap as a percentage of total host CPU capacity.
    #[serde(default)]
    pub cpu_percent: Option<u32>,
}

fn default_enabled() -> bool {
    true
}

impl TaskTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            max_calls: None,
            timeout_ms: None,
            max_memory_mb: None,
            cpu_percent: None,
        }
    }

    pub fn with_max_calls(mut self, max_calls: u32) -> Self {
        self.max_calls = Some(max_calls);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// A unit of work submitted to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,

    pub prompt: String,

    /// Extra instructions placed before the prompt (system/developer role).
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Expected answer used for evaluation. Strings are compared loosely,
    /// any other JSON value structurally.
    #[serde(default)]
    pub expected_result: Value,

    /// Host files handed to tools as auxiliary data, keyed by file name.
    #[serde(default)]
    pub files: Vec<PathBuf>,

    #[serde(default)]
    pub tools: Vec<TaskTool>,
}

impl Task {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            system_prompt: None,
            expected_result: Value::Null,
            files: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_expected(mut self, expected: impl Into<Value>) -> Self {
        self.expected_result = expected.into();
        self
    }

    pub fn with_tool(mut self, tool: TaskTool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Tools the task actually enables, in declaration order.
    pub fn enabled_tools(&self) -> impl Iterator<Item = &TaskTool> {
        self.tools.iter().filter(|t| t.enabled)
    }

    /// Read every attached file into memory, keyed by its file name.
    pub fn load_auxiliary_data(&self) -> std::io::Result<BTreeMap<String, Vec<u8>>> {
        let mut data = BTreeMap::new();
        for path in &self.files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("task file has no file name: {}", path.display()),
                    )
                })?;
            if data.contains_key(&name) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!(
                        "task file name '{name}' is used more than once: {}",
                        path.display()
                    ),
                ));
            }
            let contents = std::fs::read(path)?;
            data.insert(name, contents);
        }
        Ok(data)
    }
}
