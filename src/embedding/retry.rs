//! Retry manager.
//!
//! Executes operations under a bounded exponential backoff policy. The
//! delay schedule is `dᵢ = min(max_delay, initial_delay · factorⁱ)` with
//! ±20% jitter; sleeps are cancellation-aware. Retryability comes from the
//! typed classification on [`QuiverError`], with a substring fallback for
//! unknown upstreams.

use crate::types::{QuiverError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Jitter applied to each delay, as a fraction of the base delay.
const JITTER_FRACTION: f64 = 0.2;

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Whether retries are enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Maximum retries after the initial attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(default = "default_initial_delay")]
    pub initial_delay: Duration,
    /// Ceiling on any single delay.
    #[serde(default = "default_max_delay")]
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_enabled() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

/// Executes operations with bounded exponential backoff.
pub struct RetryManager {
    config: RetryConfig,
}

impl RetryManager {
    /// Create a retry manager with the given policy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a retry manager with the default policy.
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// The configured policy.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff delay before retry `attempt` (0-indexed), without jitter.
    fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.config.backoff_factor.powi(attempt as i32);
        let delay = self.config.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.config.max_delay.as_secs_f64()))
    }

    /// Apply ±20% jitter to a delay.
    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = rand::rng().random_range(-JITTER_FRACTION..=JITTER_FRACTION);
        Duration::from_secs_f64((delay.as_secs_f64() * (1.0 + jitter)).max(0.0))
    }

    /// Execute `operation`, retrying retryable failures.
    ///
    /// Total attempts never exceed `max_retries + 1`. Non-retryable errors
    /// short-circuit with the first error; cancellation mid-sleep returns
    /// `Cancelled`.
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.config.enabled {
            return operation().await;
        }

        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.config.max_retries {
                        return Err(err);
                    }

                    let delay = self.jittered(self.base_delay(attempt));
                    warn!(
                        attempt = attempt + 1,
                        max = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after failure"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(QuiverError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}
