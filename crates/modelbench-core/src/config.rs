//! Benchmark configuration: model run settings, tool catalogue, tasks.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{RunConfig, Task};
use crate::sandbox::ToolConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level TOML document.
///
/// ```toml
/// [run]
/// model = "gpt-4.1"
///
/// [[tools]]
/// name = "python"
/// image = "modelbench/python:3.12"
///
/// [[tasks]]
/// name = "primes"
/// prompt = "Sum the first 100 primes."
/// expected_result = 24133
/// tools = [{ name = "python", max_calls = 3 }]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    pub run: RunConfig,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl BenchConfig {
    /// Read, parse and validate a config file. Relative task file paths are
    /// resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_task_files(base);
        }
        Ok(config)
    }

    /// Parse and validate.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn tool(&self, name: &str) -> Option<&ToolConfig> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.run.model.trim().is_empty() {
            return Err(ConfigError::Invalid("run.model must not be empty".into()));
        }

        let mut names = HashSet::new();
        for tool in &self.tools {
            if !names.insert(tool.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate tool name '{}'",
                    tool.name
                )));
            }
            if tool.image.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "tool '{}' has no image",
                    tool.name
                )));
            }
        }

        for task in &self.tasks {
            for policy in &task.tools {
                if !names.contains(policy.name.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "task '{}' uses unknown tool '{}'",
                        task.name, policy.name
                    )));
                }
                if let Some(percent) = policy.cpu_percent {
                    if !(1..=100).contains(&percent) {
                        return Err(ConfigError::Invalid(format!(
                            "task '{}' tool '{}': cpu_percent must be within 1..=100, got {percent}",
                            task.name, policy.name
                        )));
                    }
                }
                if policy.max_calls == Some(0) {
                    return Err(ConfigError::Invalid(format!(
                        "task '{}' tool '{}': max_calls must be at least 1",
                        task.name, policy.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn resolve_task_files(&mut self, base: &Path) {
        for task in &mut self.tasks {
            for file in &mut task.files {
                if file.is_relative() {
                    *file = base.join(&*file);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [run]
        model = "gpt-4.1"
        max_requests_per_minute = 60

        [run.retry_policy]
        max_retry_attempts = 2
        initial_delay_seconds = 1

        [[tools]]
        name = "python"
        image = "modelbench/python:3.12"
        cmd = ["python", "/workspace/main.py"]
        parameter_files = { code = "/workspace/main.py" }

        [[tasks]]
        name = "primes"
        prompt = "Sum the first 100 primes."
        expected_result = 24133
        files = ["data/primes.txt"]
        tools = [{ name = "python", max_calls = 3, timeout_ms = 30000 }]
    "#;

    #[test]
    fn test_parse_sample() {
        let config = BenchConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.run.model, "gpt-4.1");
        assert_eq!(config.tool("python").unwrap().cmd.len(), 2);
        let task = config.task("primes").unwrap();
        assert_eq!(task.expected_result, serde_json::json!(24133));
        assert_eq!(task.tools[0].max_calls, Some(3));
    }

    #[test]
    fn test_load_resolves_task_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = BenchConfig::load(&path).unwrap();
        assert_eq!(
            config.tasks[0].files[0],
            dir.path().join("data/primes.txt")
        );
    }

    #[test]
    fn test_load_missing_file() {
        let err = BenchConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_rejects_unknown_task_tool() {
        let text = SAMPLE.replace(r#"tools = [{ name = "python""#, r#"tools = [{ name = "ruby""#);
        let err = BenchConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("unknown tool 'ruby'"));
    }

    #[test]
    fn test_rejects_bad_limits() {
        let text = SAMPLE.replace("max_calls = 3", "max_calls = 0");
        assert!(BenchConfig::from_toml_str(&text).is_err());

        let text = SAMPLE.replace("max_calls = 3", "cpu_percent = 150");
        let err = BenchConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("cpu_percent"));
    }

    #[test]
    fn test_rejects_duplicate_tools_and_empty_model() {
        let dup = format!(
            "{SAMPLE}\n[[tools]]\nname = \"python\"\nimage = \"other\"\n"
        );
        assert!(BenchConfig::from_toml_str(&dup)
            .unwrap_err()
            .to_string()
            .contains("duplicate tool"));

        let text = SAMPLE.replace(r#"model = "gpt-4.1""#, r#"model = " ""#);
        assert!(matches!(
            BenchConfig::from_toml_str(&text),
            Err(ConfigError::Invalid(_))
        ));
    }
}
