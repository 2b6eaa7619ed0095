//! Embedding service.
//!
//! Composes the provider registry, cache, rate limiter, and retry manager
//! into one entry point. A request flows cache → rate limit → timeout →
//! retry-wrapped provider call → fallback chain, and successful responses
//! feed the per-provider statistics.

use crate::embedding::cache::{
    spawn_sweeper, CacheConfig, EmbeddingCache, MemoryEmbeddingCache, NoopCache, SWEEP_INTERVAL,
};
use crate::embedding::provider::EmbeddingProvider;
use crate::embedding::rate_limit::{RateLimitConfig, RateLimiter};
use crate::embedding::retry::{RetryConfig, RetryManager};
use crate::types::{
    EmbeddingRequest, EmbeddingResponse, ProviderStats, QuiverError, Result,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for the embedding service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingServiceConfig {
    /// Provider used when a request names none.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Timeout applied when a request carries none. Zero disables.
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
    /// Maximum texts per request.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Try other providers after the selected one fails.
    #[serde(default)]
    pub enable_fallback: bool,
    /// Providers to try on fallback, in order.
    #[serde(default)]
    pub fallback_order: Vec<String>,
    /// Cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limiting: RateLimitConfig,
    /// Retry configuration.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_provider() -> String {
    "local".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_batch_size() -> usize {
    2048
}

impl Default for EmbeddingServiceConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            timeout: default_timeout(),
            max_batch_size: default_max_batch_size(),
            enable_fallback: false,
            fallback_order: Vec::new(),
            cache: CacheConfig::default(),
            rate_limiting: RateLimitConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Health of a single provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Whether the health check passed.
    pub healthy: bool,
    /// Failure detail when unhealthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Multi-provider embedding service.
///
/// Owns its provider registry, cache, rate limiter, and retry manager
/// exclusively; share the service itself behind an `Arc`.
pub struct EmbeddingService {
    config: EmbeddingServiceConfig,
    providers: RwLock<HashMap<String, Arc<dyn EmbeddingProvider>>>,
    stats: RwLock<HashMap<String, ProviderStats>>,
    cache: Arc<dyn EmbeddingCache>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
    limiter: RateLimiter,
    retry: RetryManager,
}

impl EmbeddingService {
    /// Create a service from configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unrecognized cache backends.
    pub fn new(config: EmbeddingServiceConfig) -> Result<Self> {
        let (cache, sweeper): (Arc<dyn EmbeddingCache>, _) = if config.cache.enabled {
            if config.cache.kind != "memory" {
                return Err(QuiverError::Configuration(format!(
                    "Unknown cache type '{}'; only 'memory' is supported",
                    config.cache.kind
                )));
            }
            let memory = Arc::new(MemoryEmbeddingCache::new(config.cache.clone()));
            // The sweeper needs a runtime; without one the TTL check in
            // get() still keeps expired entries out of responses.
            let sweeper = tokio::runtime::Handle::try_current()
                .ok()
                .map(|_| spawn_sweeper(&memory, SWEEP_INTERVAL));
            (memory, sweeper)
        } else {
            (Arc::new(NoopCache::new()), None)
        };

        Ok(Self {
            limiter: RateLimiter::new(config.rate_limiting.clone()),
            retry: RetryManager::new(config.retry.clone()),
            providers: RwLock::new(HashMap::new()),
            stats: RwLock::new(HashMap::new()),
            cache,
            sweeper: Mutex::new(sweeper),
            config,
        })
    }

    /// Create a service with the default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(EmbeddingServiceConfig::default())
    }

    /// The service configuration.
    pub fn config(&self) -> &EmbeddingServiceConfig {
        &self.config
    }

    /// Register a provider under its type tag.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRegistered` for a duplicate type tag.
    pub fn register_provider(&self, provider: Arc<dyn EmbeddingProvider>) -> Result<()> {
        let tag = provider.provider_type().to_string();
        let mut providers = self.providers.write();
        if providers.contains_key(&tag) {
            return Err(QuiverError::AlreadyRegistered(tag));
        }

        let caps = provider.capabilities();
        self.limiter.set_provider_limits(
            &tag,
            caps.requests_per_minute
                .min(self.config.rate_limiting.requests_per_minute),
            caps.tokens_per_minute
                .min(self.config.rate_limiting.tokens_per_minute),
        );

        info!(provider = %tag, "Registered embedding provider");
        providers.insert(tag, provider);
        Ok(())
    }

    /// Registered provider type tags.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }

    /// Look up a provider by type tag.
    pub fn get_provider(&self, tag: &str) -> Option<Arc<dyn EmbeddingProvider>> {
        self.providers.read().get(tag).cloned()
    }

    fn stats_entry<F: FnOnce(&mut ProviderStats)>(&self, provider: &str, f: F) {
        let mut stats = self.stats.write();
        f(stats.entry(provider.to_string()).or_default());
    }

    /// Generate embeddings for a request.
    ///
    /// When the selected provider fails and fallback is enabled, providers
    /// from `fallback_order` are tried sequentially; the first success
    /// wins. If none succeeds, the primary provider's error is returned.
    pub async fn generate_embeddings(
        &self,
        cancel: &CancellationToken,
        request: &EmbeddingRequest,
    ) -> Result<EmbeddingResponse> {
        if cancel.is_cancelled() {
            return Err(QuiverError::Cancelled);
        }
        if request.texts.is_empty() {
            return Err(QuiverError::EmptyInput);
        }
        if request.texts.len() > self.config.max_batch_size {
            return Err(QuiverError::InputTooLarge {
                size: request.texts.len(),
                max: self.config.max_batch_size,
            });
        }

        let start = Instant::now();
        let primary = request
            .provider
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.config.default_provider.clone());

        // Cache hit short-circuits everything else.
        if let Some(key) = &request.cache_key {
            if let Some(matrix) = self.cache.get(key) {
                self.stats_entry(&primary, |s| s.cache_hits += 1);
                debug!(key = %key, "Embedding cache hit");
                return Ok(EmbeddingResponse {
                    embeddings: matrix,
                    model: request.model.clone(),
                    provider: primary,
                    cache_hit: true,
                    processing_time: start.elapsed(),
                    ..Default::default()
                });
            }
            self.stats_entry(&primary, |s| s.cache_misses += 1);
        }

        // Local quota: deny immediately, no fallback.
        self.limiter.allow(&primary, &request.texts)?;

        let effective_timeout = request.timeout.unwrap_or(self.config.timeout);
        let attempt = self.call_with_fallback(cancel, &primary, request);

        let outcome = if effective_timeout > Duration::ZERO {
            match tokio::time::timeout(effective_timeout, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.stats_entry(&primary, |s| s.errors += 1);
                    return Err(QuiverError::Timeout);
                }
            }
        } else {
            attempt.await
        };

        let mut response = outcome?;
        response.processing_time = start.elapsed();

        // Cache write never fails the request.
        if let Some(key) = &request.cache_key {
            if let Err(e) = self.cache.set(key, response.embeddings.clone(), None) {
                warn!(key = %key, error = %e, "Failed to write embedding cache");
            }
        }

        let elapsed = start.elapsed();
        let serving = response.provider.clone();
        let usage = response.usage;
        self.stats_entry(&serving, |s| {
            s.total_requests += 1;
            s.total_tokens += usage.total_tokens as u64;
            s.total_cost += usage.cost;
            s.last_used = Some(Utc::now());
            s.record_latency(elapsed);
        });

        Ok(response)
    }

    /// Run the primary provider, then the fallback chain.
    async fn call_with_fallback(
        &self,
        cancel: &CancellationToken,
        primary: &str,
        request: &EmbeddingRequest,
    ) -> Result<EmbeddingResponse> {
        let primary_err = match self.call_provider(cancel, primary, request).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        self.stats_entry(primary, |s| s.errors += 1);

        if matches!(primary_err, QuiverError::Cancelled) || !self.config.enable_fallback {
            return Err(primary_err);
        }

        let fallback_order = self.config.fallback_order.clone();
        for tag in fallback_order.iter().filter(|t| t.as_str() != primary) {
            if self.get_provider(tag).is_none() {
                continue;
            }
            if self.limiter.allow(tag, &request.texts).is_err() {
                continue;
            }
            match self.call_provider(cancel, tag, request).await {
                Ok(response) => {
                    debug!(from = primary, to = %tag, "Fallback provider succeeded");
                    return Ok(response);
                }
                Err(e) => {
                    warn!(provider = %tag, error = %e, "Fallback provider failed");
                    self.stats_entry(tag, |s| s.errors += 1);
                }
            }
        }

        Err(primary_err)
    }

    /// Retry-wrapped call to one provider.
    async fn call_provider(
        &self,
        cancel: &CancellationToken,
        tag: &str,
        request: &EmbeddingRequest,
    ) -> Result<EmbeddingResponse> {
        let provider = self
            .get_provider(tag)
            .ok_or_else(|| QuiverError::ProviderUnavailable(tag.to_string()))?;

        self.retry
            .execute(cancel, || {
                let provider = provider.clone();
                async move { provider.generate_embeddings(request).await }
            })
            .await
    }

    /// Concurrently health-check every registered provider.
    pub async fn health_check(&self) -> Result<HashMap<String, ProviderHealth>> {
        let providers: Vec<(String, Arc<dyn EmbeddingProvider>)> = self
            .providers
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if providers.is_empty() {
            return Err(QuiverError::NotInitialized(
                "no providers registered".to_string(),
            ));
        }

        let checks = providers.into_iter().map(|(tag, provider)| async move {
            let result = provider.health_check().await;
            (
                tag,
                match result {
                    Ok(()) => ProviderHealth {
                        healthy: true,
                        error: None,
                    },
                    Err(e) => ProviderHealth {
                        healthy: false,
                        error: Some(e.to_string()),
                    },
                },
            )
        });

        Ok(futures::future::join_all(checks).await.into_iter().collect())
    }

    /// Snapshot of per-provider statistics.
    pub fn stats(&self) -> HashMap<String, ProviderStats> {
        self.stats.read().clone()
    }

    /// Cache statistics.
    pub fn cache_stats(&self) -> crate::embedding::cache::CacheStats {
        self.cache.stats()
    }

    /// Close all providers and stop the cache sweeper.
    ///
    /// Provider close failures are collected; the last one is returned.
    pub async fn close(&self) -> Result<()> {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }

        let providers: Vec<Arc<dyn EmbeddingProvider>> =
            self.providers.write().drain().map(|(_, p)| p).collect();

        let mut last_error = None;
        for provider in providers {
            if let Err(e) = provider.close().await {
                warn!(provider = provider.provider_type(), error = %e, "Provider close failed");
                last_error = Some(e);
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
