//! Batch execution engine.
//!
//! A worker-pool orchestrator fanning embedding, vector, and RAG jobs
//! across bounded concurrency with per-item error isolation, progress
//! reporting, and cooperative cancellation.

pub mod processor;

pub use processor::BatchProcessor;

use quiver_vector::{SearchResult, Vector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Error code for a failed embedding window.
pub const CODE_EMBEDDING_FAILED: &str = "EMBEDDING_GENERATION_FAILED";

/// Error code for an item abandoned by cancellation.
pub const CODE_CANCELLED: &str = "OPERATION_CANCELLED";

/// Error code for a failed vector operation.
pub const CODE_VECTOR_OP_FAILED: &str = "VECTOR_OP_FAILED";

/// Configuration for the batch processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Window size when a request does not choose one.
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,
    /// Hard ceiling on items per request.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Worker-pool size ceiling.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_batches: usize,
    /// Timeout applied when a request carries none.
    #[serde(default = "default_timeout")]
    pub default_timeout: Duration,
    /// Run vector operations across workers.
    #[serde(default = "default_parallel")]
    pub enable_parallel: bool,
    /// Worker count for vector operations (0 = use `max_concurrent_batches`).
    #[serde(default)]
    pub worker_count: usize,
    /// Concurrency bound for RAG batch fan-out.
    #[serde(default = "default_max_queries")]
    pub max_concurrent_queries: usize,
    /// Per-provider window size overrides.
    #[serde(default)]
    pub provider_batch_sizes: HashMap<String, usize>,
}

fn default_batch_size() -> usize {
    32
}

fn default_max_batch_size() -> usize {
    100_000
}

fn default_max_concurrent() -> usize {
    4
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_parallel() -> bool {
    true
}

fn default_max_queries() -> usize {
    8
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_batch_size: default_batch_size(),
            max_batch_size: default_max_batch_size(),
            max_concurrent_batches: default_max_concurrent(),
            default_timeout: default_timeout(),
            enable_parallel: default_parallel(),
            worker_count: 0,
            max_concurrent_queries: default_max_queries(),
            provider_batch_sizes: HashMap::new(),
        }
    }
}

/// A per-item failure inside a batch. Never aborts the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchError {
    /// Input index the failure applies to.
    pub index: usize,
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

/// Request for batch embedding generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchEmbeddingRequest {
    /// Texts to embed, in order.
    pub texts: Vec<String>,
    /// Logical model name.
    pub model: String,
    /// Provider tag; the service default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Preferred window size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Worker-pool size for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
    /// Per-request timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

/// Response from batch embedding generation.
///
/// Row `i` always corresponds to input text `i`; rows for failed windows
/// stay empty and the failures appear in `errors`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchEmbeddingResponse {
    /// One row per input text.
    pub embeddings: Vec<Vec<f64>>,
    /// Tokens consumed across all windows.
    pub total_tokens: usize,
    /// Windows served from cache.
    pub cache_hits: usize,
    /// Per-item failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<BatchError>,
    /// Number of windows processed.
    pub batches_processed: usize,
    /// End-to-end duration.
    pub processing_time: Duration,
}

/// Vector operation families supported by the batch processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorOp {
    /// Insert vectors into a collection.
    Insert,
    /// Replace existing vectors.
    Update,
    /// Delete vectors by id.
    Delete,
    /// Search with a query vector.
    Search,
    /// Cosine similarity of each input vector against the query vector.
    Similarity,
    /// Return normalized copies of the input vectors.
    Normalize,
    /// Euclidean distance of each input vector against the query vector.
    Distance,
}

/// Request for a batch vector operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchVectorRequest {
    /// Operation to perform.
    pub operation: VectorOp,
    /// Target collection.
    pub collection: String,
    /// Input vectors (insert/update/similarity/normalize/distance).
    #[serde(default)]
    pub vectors: Vec<Vector>,
    /// Input ids (delete).
    #[serde(default)]
    pub ids: Vec<String>,
    /// Query vector (search/similarity/distance).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_vector: Option<Vec<f64>>,
    /// Top-k for search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,
    /// Worker-pool size for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
}

/// Response from a batch vector operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchVectorResponse {
    /// Items processed successfully.
    pub processed: usize,
    /// Normalized copies (normalize only), in input order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vectors: Vec<Vector>,
    /// Search results (search only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<SearchResult>,
    /// Per-input scores (similarity/distance), `NaN` for failed items.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scores: Vec<f64>,
    /// Per-item failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<BatchError>,
    /// End-to-end duration.
    pub processing_time: Duration,
}

/// Request for batch RAG processing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchRagRequest {
    /// Query texts, in order.
    pub queries: Vec<String>,
    /// Context applied to every query.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
    /// Maximum results per query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

/// A progress snapshot emitted while a batch runs.
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress {
    /// Estimated items processed so far.
    pub processed: usize,
    /// Total items in the batch.
    pub total: usize,
    /// Time since the batch started.
    pub elapsed: Duration,
}

/// Callback invoked with progress snapshots.
pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Aggregate statistics across all batches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    /// Batches completed.
    pub total_batches: u64,
    /// Items processed across all batches.
    pub total_items: u64,
    /// Per-item errors recorded across all batches.
    pub total_errors: u64,
    /// Summed batch wall time.
    pub total_duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BatchConfig::default();
        assert_eq!(config.default_batch_size, 32);
        assert_eq!(config.max_concurrent_batches, 4);
        assert!(config.enable_parallel);
        assert_eq!(config.worker_count, 0);
    }

    #[test]
    fn test_vector_op_wire_format() {
        assert_eq!(
            serde_json::to_value(VectorOp::Similarity).unwrap(),
            serde_json::json!("similarity")
        );
        let op: VectorOp = serde_json::from_value(serde_json::json!("insert")).unwrap();
        assert_eq!(op, VectorOp::Insert);
    }
}
