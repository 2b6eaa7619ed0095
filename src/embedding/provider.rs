//! Embedding provider abstraction.
//!
//! A provider turns text into vectors. All backends (HTTP APIs, in-process
//! models, custom integrations) implement [`EmbeddingProvider`] and
//! advertise their limits through [`ProviderCapabilities`]. The uniform
//! error taxonomy of [`crate::types::QuiverError`] is enforced at this
//! boundary.

use crate::types::{EmbeddingRequest, EmbeddingResponse, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Uniform contract over text-to-vector backends.
///
/// Providers batch input texts internally to their preferred chunk size and
/// return a matrix whose row order matches the input.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider type tag, unique within a service registry
    /// (e.g. `"openai"`, `"local"`).
    fn provider_type(&self) -> &str;

    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Generate embeddings for the request's texts.
    async fn generate_embeddings(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse>;

    /// Models this provider can serve.
    fn models(&self) -> Vec<ModelInfo>;

    /// Advertised operational limits.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Verify the backend is reachable.
    async fn health_check(&self) -> Result<()>;

    /// Release backend resources.
    async fn close(&self) -> Result<()>;
}

/// Operational limits advertised by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Hard ceiling on texts per call.
    pub max_batch_size: usize,
    /// Batch size the backend performs best at.
    pub optimal_batch_size: usize,
    /// How many batches may be in flight concurrently.
    pub max_concurrent_batches: usize,
    /// Estimated latency of a single call.
    pub estimated_latency: Duration,
    /// Whether responses may be cached.
    pub supports_caching: bool,
    /// Whether failed calls may be retried.
    pub supports_retry: bool,
    /// Requests-per-minute limit.
    pub requests_per_minute: u32,
    /// Tokens-per-minute limit.
    pub tokens_per_minute: u32,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            max_batch_size: 2048,
            optimal_batch_size: 128,
            max_concurrent_batches: 4,
            estimated_latency: Duration::from_millis(200),
            supports_caching: true,
            supports_retry: true,
            requests_per_minute: 3000,
            tokens_per_minute: 1_000_000,
        }
    }
}

/// Metadata for a model a provider can serve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model name.
    pub name: String,
    /// Output dimensionality.
    pub dimension: usize,
    /// Cost per 1K tokens in USD.
    pub cost_per_1k_tokens: f64,
}

/// Estimate the token count of a text: `⌈len/4⌉`, at least 1.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4).max(1)
}

/// Estimate the total token count of a batch of texts.
pub fn estimate_batch_tokens<S: AsRef<str>>(texts: &[S]) -> usize {
    texts.iter().map(|t| estimate_tokens(t.as_ref())).sum()
}

/// Fixed cost-per-1K-tokens table.
///
/// Unknown models fall back to the ada-generation price.
pub fn cost_per_1k_tokens(model: &str) -> f64 {
    match model {
        "text-embedding-3-small" => 0.00002,
        "text-embedding-3-large" => 0.00013,
        "text-embedding-ada-002" => 0.0001,
        m if m.starts_with("local-") || m.starts_with("all-") || m.starts_with("bge-") => 0.0,
        _ => 0.0001,
    }
}

/// Estimated cost of a token count under the fixed table.
pub fn estimate_cost(model: &str, tokens: usize) -> f64 {
    cost_per_1k_tokens(model) * (tokens as f64) / 1000.0
}
