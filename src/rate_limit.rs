use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::TenantQueueSettings;

// Absorbs float drift so that exactly-elapsed refill periods count in full.
const EPSILON: f64 = 1e-9;

/// Token bucket with continuous refill. Holds at most `capacity` tokens and
/// regains `capacity` tokens every 60 seconds.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    /// New buckets start full.
    pub fn new(capacity: u32, now: DateTime<Utc>) -> Self {
        let capacity = f64::from(capacity);
        Self {
            tokens: capacity,
            capacity,
            last_refill: now,
        }
    }

    fn rate_per_second(&self) -> f64 {
        self.capacity / 60.0
    }

    pub fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.last_refill).num_milliseconds() as f64 / 1000.0;
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.rate_per_second()).min(self.capacity);
            self.last_refill = now;
        }
    }

    pub fn try_consume(&mut self) -> bool {
        if self.tokens + EPSILON >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available.
    pub fn available(&self) -> u32 {
        (self.tokens + EPSILON).floor().max(0.0) as u32
    }

    /// Change capacity, keeping current tokens clamped to the new ceiling.
    pub fn set_capacity(&mut self, capacity: u32) {
        self.capacity = f64::from(capacity);
        self.tokens = self.tokens.min(self.capacity);
    }
}

struct TenantLimit {
    bucket: TokenBucket,
    last_sent_at: Option<DateTime<Utc>>,
}

/// Per-tenant send gate: a token bucket sized by `rateLimitPerMinute` and a
/// minimum spacing of `delayBetweenMessages` between consecutive sends. Both
/// must allow a send for it to proceed.
pub struct SendRateLimiter {
    tenants: DashMap<Uuid, TenantLimit>,
}

impl SendRateLimiter {
    pub fn new() -> Self {
        Self {
            tenants: DashMap::new(),
        }
    }

    fn with_limit<R>(
        &self,
        settings: &TenantQueueSettings,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut TenantLimit) -> R,
    ) -> R {
        let capacity = settings.rate_limit_per_minute.max(1) as u32;
        let mut entry = self
            .tenants
            .entry(settings.tenant_id)
            .or_insert_with(|| TenantLimit {
                bucket: TokenBucket::new(capacity, now),
                last_sent_at: None,
            });
        let limit = entry.value_mut();
        limit.bucket.set_capacity(capacity);
        limit.bucket.refill(now);
        f(limit)
    }

    /// Sends the tenant's bucket could cover right now. Consumes nothing.
    pub fn available(&self, settings: &TenantQueueSettings, now: DateTime<Utc>) -> u32 {
        self.with_limit(settings, now, |limit| limit.bucket.available())
    }

    /// How long until the minimum spacing since the last send has elapsed.
    pub fn wait_time(&self, settings: &TenantQueueSettings, now: DateTime<Utc>) -> Duration {
        let spacing = settings.delay_between_messages();
        self.with_limit(settings, now, |limit| match limit.last_sent_at {
            Some(last) => {
                let since = (now - last).to_std().unwrap_or_default();
                spacing.saturating_sub(since)
            }
            None => Duration::ZERO,
        })
    }

    /// Take one send slot. Succeeds only when a token is available and the
    /// minimum spacing has elapsed; on success the send is recorded at `now`.
    pub fn try_acquire(&self, settings: &TenantQueueSettings, now: DateTime<Utc>) -> bool {
        let spacing = settings.delay_between_messages();
        self.with_limit(settings, now, |limit| {
            if let Some(last) = limit.last_sent_at {
                if (now - last).to_std().unwrap_or_default() < spacing {
                    return false;
                }
            }
            if !limit.bucket.try_consume() {
                return false;
            }
            limit.last_sent_at = Some(now);
            true
        })
    }

    /// Drop state for tenants idle longer than `max_age`.
    pub fn cleanup(&self, now: DateTime<Utc>, max_age: Duration) {
        self.tenants.retain(|_, limit| match limit.last_sent_at {
            Some(last) => (now - last).to_std().unwrap_or_default() < max_age,
            None => (now - limit.bucket.last_refill).to_std().unwrap_or_default() < max_age,
        });
    }
}

impl Default for SendRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
