//! Container runtime contract used by the tool executor.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::error::RuntimeError;

/// A host path bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

impl BindMount {
    pub fn read_only(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: true,
        }
    }

    pub fn read_write(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }
}

/// Everything needed to create one short-lived tool container.
///
/// Networking is never part of the spec: tool containers always run without
/// network access.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub mounts: Vec<BindMount>,
    pub memory_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
}

/// Which output streams to read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStreams {
    StdoutOnly,
    Combined,
}

/// Adapter contract for the container engine.
///
/// Implementations must never pull images implicitly.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Whether `image` is present in the local image store.
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Create (but do not start) a container; returns its id.
    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Block until the container is no longer running; returns its exit code.
    async fn wait(&self, id: &str) -> Result<i64, RuntimeError>;

    async fn logs(&self, id: &str, streams: LogStreams) -> Result<String, RuntimeError>;

    /// Force-remove the container and its anonymous volumes.
    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;

    /// CPUs available to containers, used to scale CPU percentages.
    fn host_cpus(&self) -> usize {
        num_cpus::get()
    }

    /// Release the connection to the engine.
    async fn close(&self) -> Result<(), RuntimeError> {
        Ok(())
    }
}

#[async_trait]
impl<R: ContainerRuntime> ContainerRuntime for Arc<R> {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        (**self).image_exists(image).await
    }

    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        (**self).create(name, spec).await
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        (**self).start(id).await
    }

    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        (**self).wait(id).await
    }

    async fn logs(&self, id: &str, streams: LogStreams) -> Result<String, RuntimeError> {
        (**self).logs(id, streams).await
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        (**self).remove(id).await
    }

    fn host_cpus(&self) -> usize {
        (**self).host_cpus()
    }

    async fn close(&self) -> Result<(), RuntimeError> {
        (**self).close().await
    }
}
