use std::time::Duration;

use crate::providers::ProviderError;

/// What to do with a message whose send just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    Retry(Duration),
    Fail,
}

/// Bounded exponential backoff: `base * 2^retry_count`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base: Duration,
    max: Duration,
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn next_attempt_delay(&self, retry_count: i32) -> Duration {
        let factor = 1u32
            .checked_shl(retry_count.max(0) as u32)
            .unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn is_exhausted(&self, retry_count: i32, max_retries: i32) -> bool {
        retry_count >= max_retries
    }

    /// Rejections are terminal even with retries enabled; everything else
    /// retries until the message's ceiling is reached.
    pub fn on_failure(
        &self,
        error: &ProviderError,
        enable_retries: bool,
        retry_count: i32,
        max_retries: i32,
    ) -> FailureAction {
        if !enable_retries || !error.is_retryable() || self.is_exhausted(retry_count, max_retries)
        {
            FailureAction::Fail
        } else {
            FailureAction::Retry(self.next_attempt_delay(retry_count))
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(3600))
    }
}
