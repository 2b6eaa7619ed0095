//! In-process embedding provider.
//!
//! A sentence-transformers-style local backend: no network, no API key,
//! deterministic output. Text is embedded by hashed feature folding over
//! character trigrams and the result is scaled to unit magnitude, so equal
//! texts always map to equal vectors and cosine scores are stable across
//! runs.

use crate::embedding::provider::{
    estimate_cost, estimate_tokens, EmbeddingProvider, ModelInfo, ProviderCapabilities,
};
use crate::types::{EmbeddingRequest, EmbeddingResponse, EmbeddingUsage, QuiverError, Result};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default output dimensionality.
pub const DEFAULT_DIMENSION: usize = 384;

/// Configuration for the local provider.
#[derive(Debug, Clone)]
pub struct LocalProviderConfig {
    /// Output dimensionality.
    pub dimension: usize,
    /// Model name reported in responses.
    pub model: String,
    /// Batch size used for internal chunking.
    pub batch_size: usize,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            model: "local-minilm".to_string(),
            batch_size: 256,
        }
    }
}

/// In-process deterministic embedding provider.
pub struct LocalProvider {
    config: LocalProviderConfig,
}

impl LocalProvider {
    /// Create a local provider with the given configuration.
    pub fn new(config: LocalProviderConfig) -> Self {
        Self { config }
    }

    /// Create a local provider with defaults.
    pub fn with_defaults() -> Self {
        Self::new(LocalProviderConfig::default())
    }

    /// Output dimensionality.
    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// Embed a single text deterministically.
    fn embed(&self, text: &str) -> Vec<f64> {
        let dim = self.config.dimension;
        let mut values = vec![0.0f64; dim];

        // Hashed feature folding over character trigrams (FNV-1a).
        let bytes = text.as_bytes();
        let windows: Box<dyn Iterator<Item = &[u8]> + '_> = if bytes.len() < 3 {
            Box::new(std::iter::once(bytes))
        } else {
            Box::new(bytes.windows(3))
        };

        for gram in windows {
            let mut hash: u64 = 0xcbf29ce484222325;
            for &b in gram {
                hash ^= b as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            let slot = (hash % dim as u64) as usize;
            // Alternate sign from a second hash bit to spread mass.
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            values[slot] += sign;
        }

        let magnitude = values.iter().map(|v| v * v).sum::<f64>().sqrt();
        if magnitude > 0.0 {
            for v in &mut values {
                *v /= magnitude;
            }
        }
        values
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn provider_type(&self) -> &str {
        "local"
    }

    fn name(&self) -> &str {
        "Local"
    }

    async fn generate_embeddings(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        if request.texts.is_empty() {
            return Err(QuiverError::EmptyInput);
        }

        let start = Instant::now();
        let batch_size = request
            .batch_size
            .unwrap_or(self.config.batch_size)
            .max(1);

        let mut embeddings = Vec::with_capacity(request.texts.len());
        let mut total_tokens = 0usize;

        for chunk in request.texts.chunks(batch_size) {
            for text in chunk {
                embeddings.push(self.embed(text));
                total_tokens += estimate_tokens(text);
            }
        }

        let model = if request.model.is_empty() {
            self.config.model.clone()
        } else {
            request.model.clone()
        };

        debug!(
            texts = request.texts.len(),
            total_tokens, "Generated local embeddings"
        );

        Ok(EmbeddingResponse {
            embeddings,
            model: model.clone(),
            provider: self.provider_type().to_string(),
            usage: EmbeddingUsage {
                total_tokens,
                cost: estimate_cost(&model, total_tokens),
            },
            cache_hit: false,
            processing_time: start.elapsed(),
            error: None,
        })
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            name: self.config.model.clone(),
            dimension: self.config.dimension,
            cost_per_1k_tokens: 0.0,
        }]
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            max_batch_size: 4096,
            optimal_batch_size: self.config.batch_size,
            max_concurrent_batches: 8,
            estimated_latency: Duration::from_millis(5),
            supports_caching: true,
            supports_retry: false,
            requests_per_minute: 60_000,
            tokens_per_minute: 10_000_000,
        }
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
