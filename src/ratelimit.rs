//! Per-client rate limiter
//!
//! Token bucket keyed by client IP. Each check spends one token; tokens
//! refill continuously up to the burst size. Over-limit requests are told
//! how long to wait for the next token.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::RateLimitConfig;

/// Upper bound of the retry hint given to rejected clients
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter
///
/// Thread-safe; buckets are sharded so unrelated clients do not contend.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<IpAddr, Bucket>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Create a new rate limiter with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RateLimitConfig::default())
    }

    /// Spend one token for `ip`
    ///
    /// Returns the time until a token is available when the bucket is empty.
    pub fn check(&self, ip: IpAddr) -> Result<(), Duration> {
        if !self.config.enabled {
            return Ok(());
        }

        let burst = f64::from(self.config.burst);
        let rate = self.config.refill_per_sec;
        let now = Instant::now();

        let mut entry = self.buckets.entry(ip).or_insert(Bucket {
            tokens: burst,
            last_refill: now,
        });
        let bucket = entry.value_mut();

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            // Non-finite or huge waits come from vanishing refill rates
            let wait = (1.0 - bucket.tokens) / rate;
            Err(Duration::try_from_secs_f64(wait)
                .map_or(MAX_RETRY_AFTER, |d| d.min(MAX_RETRY_AFTER)))
        }
    }

    /// Drop buckets idle longer than the configured idle time
    ///
    /// Should be called periodically to free memory
    pub fn cleanup(&self) -> usize {
        let idle = Duration::from_secs(self.config.idle_secs);
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| bucket.last_refill.elapsed() < idle);
        before.saturating_sub(self.buckets.len())
    }

    /// Get current number of tracked IPs
    pub fn tracked_ips_count(&self) -> usize {
        self.buckets.len()
    }
}
