//! Time-related runtime abstractions shared by domain services.
//!
//! Services read wall-clock time through [`mockable::Clock`] and suspend
//! through [`Sleeper`], so tests can drive both deterministically.

use std::time::Duration;

use async_trait::async_trait;

/// Async sleep abstraction.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspend the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Tokio-based sleeper implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
