//! Orchestration of provider attempts: throttling, retries, cancellation.

pub mod executor;
pub mod provider;
pub mod rate_limit;
pub mod retry;

pub use executor::{Executor, RetryNotify};
pub use provider::Provider;
pub use rate_limit::RequestLimiter;
pub use retry::Backoff;
