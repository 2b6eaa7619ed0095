//! Core types used throughout quiver.
//!
//! This module contains the common data structures used for:
//! - Embedding requests, responses, and provider statistics
//! - RAG queries and responses
//! - Error handling

use chrono::{DateTime, Utc};
use quiver_vector::VectorMetadata;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Result type for quiver operations.
pub type Result<T> = std::result::Result<T, QuiverError>;

// ============= Error Handling =============

/// Errors surfaced by the quiver core.
///
/// The taxonomy groups into validation (never retried), resource
/// (rate/timeout/cancel), upstream (provider failures, retryable subset),
/// and internal. HTTP status mapping is the caller's job.
#[derive(Error, Debug)]
pub enum QuiverError {
    // ----- Validation -----
    /// A required request was missing entirely.
    #[error("Request is nil")]
    NilRequest,

    /// Input collection was empty.
    #[error("Input is empty")]
    EmptyInput,

    /// Input exceeded the configured maximum.
    #[error("Input too large: {size} items exceeds maximum {max}")]
    InputTooLarge {
        /// Number of items submitted.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Vector dimensions did not match.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimensions.
        expected: usize,
        /// Actual dimensions provided.
        actual: usize,
    },

    /// Operation tag was not recognized.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    // ----- Resource -----
    /// The local token bucket denied the request.
    #[error("Rate limit exceeded for provider '{0}'")]
    RateLimitExceeded(String),

    /// The operation ran past its deadline.
    #[error("Operation timed out")]
    Timeout,

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    // ----- Upstream -----
    /// The provider could not be reached or refused service.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The upstream API answered with a failure status.
    #[error("Upstream HTTP error {status}: {message}")]
    UpstreamHttp {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },

    /// The upstream answered with a rate-limit response.
    #[error("Upstream rate limited: {0}")]
    RateLimited(String),

    /// The upstream response could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),

    // ----- Registration / configuration -----
    /// A provider with the same type tag is already registered.
    #[error("Provider '{0}' already registered")]
    AlreadyRegistered(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ----- Internal -----
    /// A required collaborator was missing.
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// A configured strategy has no implementation.
    #[error("Not implemented: {0}")]
    Unimplemented(String),

    /// Index substrate error.
    #[error(transparent)]
    Index(#[from] quiver_vector::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QuiverError {
    /// Whether the retry manager may run this error again.
    ///
    /// Typed variants classify directly; `Internal` errors from unknown
    /// upstreams fall back to a substring match on the message.
    pub fn is_retryable(&self) -> bool {
        match self {
            QuiverError::ProviderUnavailable(_)
            | QuiverError::RateLimited(_)
            | QuiverError::Timeout => true,
            QuiverError::UpstreamHttp { status, .. } => *status == 429 || *status >= 500,
            QuiverError::Internal(message) => is_retryable_message(message),
            _ => false,
        }
    }
}

/// Substring fallback classification for errors from unknown upstreams.
pub fn is_retryable_message(message: &str) -> bool {
    const RETRYABLE: &[&str] = &[
        "timeout",
        "connection",
        "network",
        "unavailable",
        "rate limit",
        "too many requests",
        "internal server error",
        "service unavailable",
    ];
    let lower = message.to_lowercase();
    RETRYABLE.iter().any(|needle| lower.contains(needle))
}

// ============= Embedding Types =============

/// A request for text embeddings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// The texts to embed, in order.
    pub texts: Vec<String>,
    /// Logical model name.
    pub model: String,
    /// Logical provider tag; the service default is used when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Preferred batch size for provider-side chunking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Free-form provider options.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub options: HashMap<String, serde_json::Value>,
    /// Per-request timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Explicit cache key; caching is skipped when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    /// Free-form request metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl EmbeddingRequest {
    /// Create a request for the given texts and model.
    pub fn new(texts: Vec<String>, model: impl Into<String>) -> Self {
        Self {
            texts,
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set the provider tag.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Set the cache key.
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Token usage and cost for an embedding call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    /// Total tokens consumed.
    pub total_tokens: usize,
    /// Estimated cost in USD.
    pub cost: f64,
}

/// A response containing generated embeddings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// One embedding row per input text, in input order.
    pub embeddings: Vec<Vec<f64>>,
    /// Model that produced the embeddings.
    pub model: String,
    /// Provider that produced the embeddings.
    pub provider: String,
    /// Token usage and cost.
    pub usage: EmbeddingUsage,
    /// Whether the response was served from cache.
    pub cache_hit: bool,
    /// End-to-end processing duration.
    pub processing_time: Duration,
    /// Optional non-fatal error detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-provider usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderStats {
    /// Total requests served.
    pub total_requests: u64,
    /// Total tokens consumed.
    pub total_tokens: u64,
    /// Total estimated cost in USD.
    pub total_cost: f64,
    /// Cache hits attributed to this provider.
    pub cache_hits: u64,
    /// Cache misses attributed to this provider.
    pub cache_misses: u64,
    /// Failed requests.
    pub errors: u64,
    /// When the provider last served a request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    /// Running average latency (EWMA with α = 0.5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_latency: Option<Duration>,
}

impl ProviderStats {
    /// Fold an observed latency into the running average.
    ///
    /// `avg = (avg + observed) / 2`; the first observation seeds the
    /// average directly.
    pub fn record_latency(&mut self, observed: Duration) {
        self.average_latency = Some(match self.average_latency {
            Some(avg) => (avg + observed) / 2,
            None => observed,
        });
    }
}

// ============= RAG Types =============

/// Classification tag for a RAG query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Plain semantic similarity search.
    Semantic,
    /// Combined dense and keyword scoring.
    Hybrid,
    /// Context-weighted search.
    Contextual,
    /// Multi-modal search.
    Multimodal,
}

/// A natural-language query to the RAG engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagQuery {
    /// The query text.
    pub text: String,
    /// Optional query classification.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<QueryType>,
    /// Free-form context (`user_id`, `domain`, `location`, `time_context`, …).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
    /// Free-form result filters.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub filters: HashMap<String, serde_json::Value>,
    /// Maximum number of results to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    /// Minimum score for returned results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    /// Include vector metadata in results.
    #[serde(default)]
    pub include_metadata: bool,
    /// Further free-form options.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub options: HashMap<String, serde_json::Value>,
}

impl RagQuery {
    /// Create a query over the given text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Attach a context value.
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Set the maximum result count.
    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }
}

/// A single result within a RAG response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Id of the matched vector.
    pub id: String,
    /// Source text of the matched vector, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Similarity score (higher = better).
    pub score: f64,
    /// Distance (lower = closer).
    pub distance: f64,
    /// Relevance derived as `1 − distance`.
    pub relevance: f64,
    /// Metadata, included when the query asked for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VectorMetadata>,
    /// The matched embedding; used by rerankers, omitted from wire output.
    #[serde(skip)]
    pub embedding: Vec<f64>,
}

/// Response from the RAG engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagResponse {
    /// Ordered results.
    pub results: Vec<QueryResult>,
    /// The query as executed (after processing).
    pub query: RagQuery,
    /// Total result count.
    pub total_results: usize,
    /// End-to-end processing duration.
    pub processing_time: Duration,
    /// Expansion terms applied during search.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expansion_terms: Vec<String>,
    /// Metadata recorded by rerankers.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub reranker_metadata: HashMap<String, serde_json::Value>,
    /// Free-form response metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Aggregate statistics for the RAG engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagStats {
    /// Queries received.
    pub total_queries: u64,
    /// Queries completed successfully.
    pub successful_queries: u64,
    /// Queries that failed.
    pub failed_queries: u64,
    /// Responses served from the query cache.
    pub cache_hits: u64,
    /// Sum of processing times for successful queries.
    pub total_latency: Duration,
    /// `total_latency / total_queries`.
    pub average_latency: Duration,
}
