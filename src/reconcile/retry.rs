//! @ai:module:intent Bounded retry with explicit backoff for delayed provider metadata
//! @ai:module:layer application
//! @ai:module:public_api RetryPolicy, Backoff, retry_until
//! @ai:module:stateless true

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// @ai:intent How the wait grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// base_delay * attempt
    Linear,
    Constant,
}

/// @ai:intent Attempt budget and wait schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Linear,
        }
    }

    pub fn constant(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Constant,
        }
    }

    /// @ai:intent Wait before the given 1-based attempt
    /// @ai:effects pure
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Constant => self.base_delay,
        }
    }

    /// @ai:intent Worst-case time spent waiting across the whole budget
    /// @ai:effects pure
    pub fn total_budget(&self) -> Duration {
        (1..=self.max_attempts).map(|n| self.delay_for(n)).sum()
    }
}

/// @ai:intent Run `op` until it yields a value or the budget is spent
/// @ai:post errors are logged and treated like an empty attempt
/// @ai:effects time
pub async fn retry_until<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.delay_for(attempt)).await;

        match op(attempt).await {
            Ok(Some(value)) => return Some(value),
            Ok(None) => debug!("{}: attempt {} yielded nothing", label, attempt),
            Err(e) => debug!("{}: attempt {} failed: {}", label, attempt, e),
        }
    }

    None
}
