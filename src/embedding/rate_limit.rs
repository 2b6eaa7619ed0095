//! Per-provider rate limiting.
//!
//! Token buckets with burst capacity, refilled continuously from the
//! per-minute limits. Every call withdraws one request token plus the
//! estimated text-token cost of the batch; [`RateLimiter::allow`] denies
//! immediately when a bucket is short, [`RateLimiter::wait`] sleeps until
//! refill or cancellation.

use crate::embedding::provider::estimate_batch_tokens;
use crate::types::{QuiverError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Requests-per-minute for providers nothing was registered for.
const UNKNOWN_PROVIDER_RPM: u32 = 60;

/// Tokens-per-minute for providers nothing was registered for.
const UNKNOWN_PROVIDER_TPM: u32 = 10_000;

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Requests per minute granted to registered providers.
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,
    /// Tokens per minute granted to registered providers.
    #[serde(default = "default_tpm")]
    pub tokens_per_minute: u32,
    /// Burst capacity in requests.
    #[serde(default = "default_burst")]
    pub burst_size: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_rpm() -> u32 {
    3000
}

fn default_tpm() -> u32 {
    1_000_000
}

fn default_burst() -> u32 {
    10
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            requests_per_minute: default_rpm(),
            tokens_per_minute: default_tpm(),
            burst_size: default_burst(),
        }
    }
}

struct Bucket {
    requests: f64,
    tokens: f64,
    request_capacity: f64,
    token_capacity: f64,
    /// Refill rates per second.
    request_rate: f64,
    token_rate: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rpm: u32, tpm: u32, burst: u32) -> Self {
        let request_capacity = burst.max(1) as f64;
        // Token burst scales with the request burst over a one-second window.
        let token_capacity = ((tpm as f64 / 60.0) * burst.max(1) as f64).max(1.0);
        Self {
            requests: request_capacity,
            tokens: token_capacity,
            request_capacity,
            token_capacity,
            request_rate: rpm as f64 / 60.0,
            token_rate: tpm as f64 / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.requests = (self.requests + elapsed * self.request_rate).min(self.request_capacity);
        self.tokens = (self.tokens + elapsed * self.token_rate).min(self.token_capacity);
        self.last_refill = now;
    }

    /// Take one request plus `token_cost` tokens, or report how long until
    /// both could be available. `None` means the cost can never fit.
    fn try_take(&mut self, token_cost: f64) -> std::result::Result<(), Option<Duration>> {
        self.refill();

        if token_cost > self.token_capacity {
            return Err(None);
        }

        if self.requests >= 1.0 && self.tokens >= token_cost {
            self.requests -= 1.0;
            self.tokens -= token_cost;
            return Ok(());
        }

        let request_wait = if self.requests >= 1.0 {
            0.0
        } else {
            (1.0 - self.requests) / self.request_rate
        };
        let token_wait = if self.tokens >= token_cost {
            0.0
        } else {
            (token_cost - self.tokens) / self.token_rate
        };
        Err(Some(Duration::from_secs_f64(request_wait.max(token_wait))))
    }
}

/// Per-provider token-bucket rate limiter.
///
/// Buckets are created lazily on first use: providers registered through
/// [`RateLimiter::set_provider_limits`] get their registered limits,
/// anything else gets tighter unknown-provider defaults.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
    limits: Mutex<HashMap<String, (u32, u32)>>,
}

impl RateLimiter {
    /// Create a limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
            limits: Mutex::new(HashMap::new()),
        }
    }

    /// Register per-provider limits, replacing any existing bucket.
    pub fn set_provider_limits(&self, provider: &str, rpm: u32, tpm: u32) {
        self.limits
            .lock()
            .insert(provider.to_string(), (rpm, tpm));
        self.buckets.lock().remove(provider);
    }

    fn with_bucket<T>(&self, provider: &str, f: impl FnOnce(&mut Bucket) -> T) -> T {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(provider.to_string()).or_insert_with(|| {
            let (rpm, tpm) = self
                .limits
                .lock()
                .get(provider)
                .copied()
                .unwrap_or((UNKNOWN_PROVIDER_RPM, UNKNOWN_PROVIDER_TPM));
            trace!(provider, rpm, tpm, "Created rate-limit bucket");
            Bucket::new(rpm, tpm, self.config.burst_size)
        });
        f(bucket)
    }

    /// Check admission without blocking.
    ///
    /// Withdraws one request and the estimated token cost of `texts`, or
    /// returns `RateLimitExceeded` immediately.
    pub fn allow<S: AsRef<str>>(&self, provider: &str, texts: &[S]) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let cost = estimate_batch_tokens(texts) as f64;
        self.with_bucket(provider, |bucket| bucket.try_take(cost))
            .map_err(|_| QuiverError::RateLimitExceeded(provider.to_string()))
    }

    /// Block until admission is granted or the caller cancels.
    pub async fn wait<S: AsRef<str>>(
        &self,
        provider: &str,
        texts: &[S],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let cost = estimate_batch_tokens(texts) as f64;
        loop {
            let outcome = self.with_bucket(provider, |bucket| bucket.try_take(cost));
            match outcome {
                Ok(()) => return Ok(()),
                Err(None) => {
                    // The cost can never fit in the bucket; waiting is futile.
                    return Err(QuiverError::RateLimitExceeded(provider.to_string()));
                }
                Err(Some(wait)) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(QuiverError::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    /// Available request tokens for a provider (testing/monitoring).
    pub fn available_requests(&self, provider: &str) -> f64 {
        self.with_bucket(provider, |bucket| {
            bucket.refill();
            bucket.requests
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rpm: u32, burst: u32) -> RateLimiter {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: true,
            requests_per_minute: rpm,
            tokens_per_minute: 1_000_000,
            burst_size: burst,
        });
        limiter.set_provider_limits("openai", rpm, 1_000_000);
        limiter
    }

    #[test]
    fn test_burst_then_denied() {
        let limiter = limiter(60, 1);

        limiter.allow("openai", &["t"]).unwrap();
        let second = limiter.allow("openai", &["t"]);
        assert!(matches!(second, Err(QuiverError::RateLimitExceeded(_))));
    }

    #[test]
    fn test_burst_capacity() {
        let limiter = limiter(60, 5);

        for _ in 0..5 {
            limiter.allow("openai", &["t"]).unwrap();
        }
        assert!(limiter.allow("openai", &["t"]).is_err());
    }

    #[test]
    fn test_disabled_allows_everything() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            ..Default::default()
        });

        for _ in 0..1000 {
            limiter.allow("anyone", &["t"]).unwrap();
        }
    }

    #[test]
    fn test_unknown_provider_gets_tight_defaults() {
        let limiter = RateLimiter::new(RateLimitConfig {
            burst_size: 1,
            ..Default::default()
        });

        limiter.allow("mystery", &["t"]).unwrap();
        assert!(limiter.allow("mystery", &["t"]).is_err());
        // Registered providers are unaffected.
        limiter.set_provider_limits("known", 6000, 1_000_000);
        limiter.allow("known", &["t"]).unwrap();
    }

    #[test]
    fn test_token_cost_deducted() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: true,
            requests_per_minute: 6000,
            tokens_per_minute: 60,
            burst_size: 1,
        });
        limiter.set_provider_limits("p", 6000, 60);

        // Capacity is one second of tokens: 1. A 4-char text costs 1 token.
        limiter.allow("p", &["abcd"]).unwrap();
        assert!(limiter.allow("p", &["abcd"]).is_err());
    }

    #[test]
    fn test_oversized_cost_never_fits() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: true,
            requests_per_minute: 60,
            tokens_per_minute: 60,
            burst_size: 1,
        });
        limiter.set_provider_limits("p", 60, 60);

        let huge = "x".repeat(4000); // 1000 tokens, capacity 1
        assert!(limiter.allow("p", &[huge]).is_err());
    }

    #[tokio::test]
    async fn test_wait_refills() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: true,
            requests_per_minute: 600, // 10/sec
            tokens_per_minute: 1_000_000,
            burst_size: 1,
        });
        limiter.set_provider_limits("p", 600, 1_000_000);
        let cancel = CancellationToken::new();

        limiter.allow("p", &["t"]).unwrap();

        let start = Instant::now();
        limiter.wait("p", &["t"], &cancel).await.unwrap();
        // One token refills in ~100ms at 10/sec.
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_wait_cancelled() {
        let limiter = limiter(1, 1); // one request per minute
        let cancel = CancellationToken::new();

        limiter.allow("openai", &["t"]).unwrap();

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let result = limiter.wait("openai", &["t"], &cancel).await;
        assert!(matches!(result, Err(QuiverError::Cancelled)));
    }

    #[tokio::test]
    async fn test_wait_when_disabled() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        limiter.wait("p", &["t"], &cancel).await.unwrap();
    }
}
