//! Tracing subscriber setup for modelbench binaries.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "MODELBENCH_LOG";

/// Install the global subscriber.
///
/// Filtering comes from `MODELBENCH_LOG`, then `RUST_LOG`, then `level`.
/// With `json` set, every line is a JSON object. Only the first call in a
/// process has any effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(fmt::layer().with_target(false).json().flatten_event(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    // Already installed (tests, embedding binaries).
    installed.ok();
}
