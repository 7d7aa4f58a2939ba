//! Per-executor request throttling.

use std::num::NonZeroU32;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio_util::sync::CancellationToken;

use crate::domain::ProviderError;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Evenly spaced request budget: `rpm` requests per minute, no bursts.
pub struct RequestLimiter {
    limiter: DirectLimiter,
    per_minute: NonZeroU32,
}

impl RequestLimiter {
    /// `None` when `rpm` is 0 (unlimited).
    pub fn per_minute(rpm: u32) -> Option<Self> {
        let per_minute = NonZeroU32::new(rpm)?;
        let quota = Quota::per_minute(per_minute).allow_burst(NonZeroU32::MIN);
        Some(Self {
            limiter: RateLimiter::direct(quota),
            per_minute,
        })
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.per_minute.get()
    }

    /// Wait for the next request slot, or fail with
    /// [`ProviderError::Cancelled`] if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ProviderError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            _ = self.limiter.until_ready() => Ok(()),
        }
    }
}

impl std::fmt::Debug for RequestLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLimiter")
            .field("per_minute", &self.per_minute)
            .finish()
    }
}
