//! OpenAI-style HTTP embedding provider.
//!
//! Speaks the `POST {base}/embeddings` JSON protocol used by OpenAI and
//! compatible endpoints. Upstream failures are mapped onto the typed error
//! taxonomy: 429 becomes `RateLimited`, other failure statuses become
//! `UpstreamHttp`, connect failures become `ProviderUnavailable`, and
//! undecodable bodies become `Parse`.

use crate::embedding::provider::{
    cost_per_1k_tokens, EmbeddingProvider, ModelInfo, ProviderCapabilities,
};
use crate::types::{
    EmbeddingRequest, EmbeddingResponse, EmbeddingUsage, QuiverError, Result,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default public API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Default embedding model.
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Configuration for the OpenAI-style provider.
#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    /// API key sent as a bearer token.
    pub api_key: String,
    /// Base URL (e.g. `https://api.openai.com/v1`).
    pub api_base: String,
    /// Default model when a request does not name one.
    pub model: String,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Batch size used for internal chunking.
    pub batch_size: usize,
}

impl Default for OpenAiProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(30),
            batch_size: 512,
        }
    }
}

/// OpenAI-style HTTP embedding provider.
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiProviderConfig,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct ApiResponse {
    data: Vec<ApiEmbedding>,
    usage: ApiUsage,
}

#[derive(Deserialize)]
struct ApiEmbedding {
    embedding: Vec<f64>,
    index: usize,
}

#[derive(Deserialize, Default)]
struct ApiUsage {
    #[serde(default)]
    total_tokens: usize,
}

impl OpenAiProvider {
    /// Create a provider from a configuration.
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| QuiverError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Create a provider for the public API with the given key.
    pub fn with_api_key(api_key: impl Into<String>) -> Result<Self> {
        Self::new(OpenAiProviderConfig {
            api_key: api_key.into(),
            ..Default::default()
        })
    }

    fn map_transport_error(e: reqwest::Error) -> QuiverError {
        if e.is_timeout() {
            QuiverError::Timeout
        } else if e.is_connect() {
            QuiverError::ProviderUnavailable(e.to_string())
        } else {
            QuiverError::Internal(e.to_string())
        }
    }

    /// Call the embeddings endpoint for one chunk of texts.
    async fn embed_chunk(&self, model: &str, chunk: &[String]) -> Result<ApiResponse> {
        let url = format!("{}/embeddings", self.config.api_base.trim_end_matches('/'));
        let body = ApiRequest {
            model,
            input: chunk,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => QuiverError::RateLimited(message),
                code => QuiverError::UpstreamHttp {
                    status: code,
                    message,
                },
            });
        }

        let mut parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| QuiverError::Parse(e.to_string()))?;

        if parsed.data.len() != chunk.len() {
            return Err(QuiverError::Parse(format!(
                "Expected {} embeddings, got {}",
                chunk.len(),
                parsed.data.len()
            )));
        }

        // The API may reorder rows; the index field is authoritative.
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn provider_type(&self) -> &str {
        "openai"
    }

    fn name(&self) -> &str {
        "OpenAI"
    }

    async fn generate_embeddings(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        if request.texts.is_empty() {
            return Err(QuiverError::EmptyInput);
        }

        let start = Instant::now();
        let model = if request.model.is_empty() {
            self.config.model.as_str()
        } else {
            request.model.as_str()
        };
        let batch_size = request
            .batch_size
            .unwrap_or(self.config.batch_size)
            .max(1);

        let mut embeddings = Vec::with_capacity(request.texts.len());
        let mut total_tokens = 0usize;

        for chunk in request.texts.chunks(batch_size) {
            let parsed = self.embed_chunk(model, chunk).await?;
            total_tokens += parsed.usage.total_tokens;
            embeddings.extend(parsed.data.into_iter().map(|d| d.embedding));
        }

        debug!(
            texts = request.texts.len(),
            total_tokens, model, "Generated embeddings via API"
        );

        Ok(EmbeddingResponse {
            embeddings,
            model: model.to_string(),
            provider: self.provider_type().to_string(),
            usage: EmbeddingUsage {
                total_tokens,
                cost: cost_per_1k_tokens(model) * (total_tokens as f64) / 1000.0,
            },
            cache_hit: false,
            processing_time: start.elapsed(),
            error: None,
        })
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                name: "text-embedding-3-small".to_string(),
                dimension: 1536,
                cost_per_1k_tokens: cost_per_1k_tokens("text-embedding-3-small"),
            },
            ModelInfo {
                name: "text-embedding-3-large".to_string(),
                dimension: 3072,
                cost_per_1k_tokens: cost_per_1k_tokens("text-embedding-3-large"),
            },
            ModelInfo {
                name: "text-embedding-ada-002".to_string(),
                dimension: 1536,
                cost_per_1k_tokens: cost_per_1k_tokens("text-embedding-ada-002"),
            },
        ]
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            max_batch_size: 2048,
            optimal_batch_size: self.config.batch_size,
            max_concurrent_batches: 4,
            estimated_latency: Duration::from_millis(250),
            supports_caching: true,
            supports_retry: true,
            requests_per_minute: 3000,
            tokens_per_minute: 1_000_000,
        }
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/models", self.config.api_base.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(QuiverError::UpstreamHttp {
                status: status.as_u16(),
                message: status.to_string(),
            })
        }
    }

    async fn close(&self) -> Result<()> {
        // reqwest clients release their pool on drop.
        Ok(())
    }
}
