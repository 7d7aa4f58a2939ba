//! Tool registry and per-tool usage accounting, owned by one executor.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::domain::ToolUsage;

use super::tool::DockerTool;

/// Tools registered for one task run, keyed by name.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<DockerTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a tool under its name, replacing any previous registration.
    pub fn register(&self, tool: DockerTool) {
        let mut tools = self.tools.write().unwrap_or_else(|p| p.into_inner());
        tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<DockerTool>> {
        let tools = self.tools.read().unwrap_or_else(|p| p.into_inner());
        tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Call counts and cumulative execution time per tool.
#[derive(Debug, Default)]
pub struct UsageTracker {
    usage: Mutex<HashMap<String, ToolUsage>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self, tool: &str) -> u64 {
        let usage = self.usage.lock().unwrap_or_else(|p| p.into_inner());
        usage.get(tool).map(|u| u.call_count).unwrap_or(0)
    }

    /// Count one execution of `tool` that took `elapsed`.
    pub fn record(&self, tool: &str, elapsed: Duration) {
        let mut usage = self.usage.lock().unwrap_or_else(|p| p.into_inner());
        let entry = usage.entry(tool.to_string()).or_default();
        entry.call_count += 1;
        entry.total_time_ns = entry
            .total_time_ns
            .saturating_add(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));
    }

    /// Consistent copy of all counters.
    pub fn snapshot(&self) -> BTreeMap<String, ToolUsage> {
        let usage = self.usage.lock().unwrap_or_else(|p| p.into_inner());
        usage.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}
