//! Containerised tool execution.
//!
//! A tool is a container image that reads its inputs from bind-mounted files
//! and prints a JSON result on stdout. Every call gets a fresh container with
//! no network, bounded memory and CPU, and an optional timeout.

pub mod docker;
pub mod error;
pub mod executor;
pub mod registry;
pub mod runtime;
pub mod tool;
pub mod workspace;

pub use docker::DockerRuntime;
pub use error::{RuntimeError, ToolError, ToolResult};
pub use executor::{usage_stats_of, DockerToolExecutor};
pub use registry::{ToolRegistry, UsageTracker};
pub use runtime::{BindMount, ContainerRuntime, ContainerSpec, LogStreams};
pub use tool::{DockerTool, ToolConfig};
pub use workspace::{CallWorkspace, SharedDirectory};
