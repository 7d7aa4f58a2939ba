//! Tool descriptors: the static catalogue entry and its task-bound view.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::TaskTool;

/// Static identity of a containerised tool, loaded once from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,

    /// Container image; must already be present locally.
    pub image: String,

    #[serde(default)]
    pub description: String,

    /// JSON schema of the tool arguments, advertised to the model.
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,

    /// Argument name -> in-container file path. Each present argument is
    /// written to a host file and bind-mounted at that path.
    #[serde(default)]
    pub parameter_files: BTreeMap<String, String>,

    /// In-container directory receiving the caller's auxiliary files.
    #[serde(default)]
    pub auxiliary_dir: Option<String>,

    /// In-container mount point of the per-run shared directory.
    #[serde(default)]
    pub shared_dir: Option<String>,

    #[serde(default)]
    pub cmd: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolConfig {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            description: String::new(),
            parameters: empty_object_schema(),
            parameter_files: BTreeMap::new(),
            auxiliary_dir: None,
            shared_dir: None,
            cmd: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_parameter_file(
        mut self,
        argument: impl Into<String>,
        container_path: impl Into<String>,
    ) -> Self {
        self.parameter_files
            .insert(argument.into(), container_path.into());
        self
    }

    pub fn with_auxiliary_dir(mut self, dir: impl Into<String>) -> Self {
        self.auxiliary_dir = Some(dir.into());
        self
    }

    pub fn with_shared_dir(mut self, dir: impl Into<String>) -> Self {
        self.shared_dir = Some(dir.into());
        self
    }

    pub fn with_cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Environment in `KEY=value` form.
    pub fn env_list(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// A [`ToolConfig`] bound to the limits of one task run.
///
/// Owned by a single executor and rebuilt for every task execution.
#[derive(Debug, Clone, PartialEq)]
pub struct DockerTool {
    pub config: ToolConfig,
    pub max_calls: Option<u32>,
    pub timeout: Option<Duration>,
    pub max_memory_mb: Option<u64>,
    pub cpu_percent: Option<u32>,
}

impl DockerTool {
    pub fn new(config: ToolConfig) -> Self {
        Self {
            config,
            max_calls: None,
            timeout: None,
            max_memory_mb: None,
            cpu_percent: None,
        }
    }

    /// Apply the task's policy for this tool.
    pub fn for_task(config: ToolConfig, policy: &TaskTool) -> Self {
        Self {
            config,
            max_calls: policy.max_calls,
            timeout: policy.timeout(),
            max_memory_mb: policy.max_memory_mb,
            cpu_percent: policy.cpu_percent,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn with_max_calls(mut self, max_calls: u32) -> Self {
        self.max_calls = Some(max_calls);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_memory_mb(mut self, mb: u64) -> Self {
        self.max_memory_mb = Some(mb);
        self
    }

    pub fn with_cpu_percent(mut self, percent: u32) -> Self {
        self.cpu_percent = Some(percent);
        self
    }

    /// Memory cap in bytes.
    pub fn memory_limit_bytes(&self) -> Option<i64> {
        self.max_memory_mb
            .map(|mb| i64::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX))
    }

    /// CPU cap in billionths of a CPU, scaled by the host's CPU count so that
    /// 100% means the whole machine.
    pub fn nano_cpus(&self, host_cpus: usize) -> Option<i64> {
        self.cpu_percent.map(|percent| {
            let cpus = f64::from(percent) / 100.0 * host_cpus as f64;
            (cpus * 1e9) as i64
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_config_from_toml() {
        let cfg: ToolConfig = toml::from_str(
            r#"
            name = "python"
            image = "modelbench/python:3.12"
            description = "Run a python script"
            cmd = ["python", "/workspace/main.py"]
            auxiliary_dir = "/data"
            shared_dir = "/shared"

            [parameter_files]
            code = "/workspace/main.py"

            [env]
            PYTHONUNBUFFERED = "1"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.parameter_files["code"], "/workspace/main.py");
        assert_eq!(cfg.env_list(), vec!["PYTHONUNBUFFERED=1".to_string()]);
        assert_eq!(cfg.parameters["type"], "object");
    }

    #[test]
    fn test_for_task_copies_limits() {
        let policy = TaskTool::new("echo").with_max_calls(2).with_timeout_ms(1500);
        let tool = DockerTool::for_task(ToolConfig::new("echo", "alpine"), &policy);
        assert_eq!(tool.max_calls, Some(2));
        assert_eq!(tool.timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_resource_conversions() {
        let tool = DockerTool::new(ToolConfig::new("echo", "alpine"))
            .with_max_memory_mb(256)
            .with_cpu_percent(50);

        assert_eq!(tool.memory_limit_bytes(), Some(256 * 1024 * 1024));
        assert_eq!(tool.nano_cpus(4), Some(2_000_000_000));
        assert_eq!(DockerTool::new(ToolConfig::new("a", "b")).nano_cpus(8), None);
    }
}
