//! Wire types exposed to the serving layer.
//!
//! Field names are stable; existing HTTP clients depend on these exact
//! JSON shapes.

use crate::rag::ExpansionTerm;
use crate::types::RagResponse;
use quiver_vector::Vector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Request to create an index (collection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateIndexRequest {
    /// Index (collection) name.
    pub id: String,
    /// Index substrate tag (`flat`, `hnsw`, `ivf`).
    #[serde(rename = "type", default)]
    pub index_type: Option<String>,
    /// Vector dimensionality.
    pub dimension: usize,
    /// Maximum elements (0 = unlimited).
    #[serde(default)]
    pub max_elements: usize,
    /// Distance metric (`cosine`, `euclidean`, `dot_product`, `manhattan`).
    #[serde(default)]
    pub distance_metric: Option<String>,
    /// Normalize vectors on insert.
    #[serde(default)]
    pub normalize: bool,
    /// Graph: connections per element per layer.
    #[serde(default)]
    pub m: Option<usize>,
    /// Graph: construction candidate list size.
    #[serde(default)]
    pub ef_construction: Option<usize>,
    /// Graph: search candidate list size.
    #[serde(default)]
    pub ef_search: Option<usize>,
    /// Graph: maximum layers.
    #[serde(default)]
    pub max_layers: Option<usize>,
    /// Clustered: number of clusters.
    #[serde(default)]
    pub num_clusters: Option<usize>,
    /// Clustered: target cluster size.
    #[serde(default)]
    pub cluster_size: Option<usize>,
}

/// One vector in an insert request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertVector {
    /// Vector id; generated when empty.
    #[serde(default)]
    pub id: String,
    /// Owning collection; defaults to the target index.
    #[serde(default)]
    pub collection: String,
    /// Embedding values.
    pub embedding: Vec<f64>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// One search hit on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// The matched vector.
    pub vector: Vector,
    /// Similarity score (higher = better).
    pub score: f64,
    /// Distance (lower = closer).
    pub distance: f64,
}

/// RAG operations recognized by the serving surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RagOperation {
    /// Expansion terms only, no search.
    QueryExpansion,
    /// Retrieval with the reranker chain applied.
    ResultReranking,
    /// Retrieval without generation concerns.
    ContextRetrieval,
    /// The full pipeline.
    EndToEndRag,
    /// Batch retrieval.
    BatchSearch,
    /// Batch retrieval with reranking.
    BatchRerank,
}

impl RagOperation {
    /// Wire name of the operation.
    pub fn name(&self) -> &'static str {
        match self {
            RagOperation::QueryExpansion => "query_expansion",
            RagOperation::ResultReranking => "result_reranking",
            RagOperation::ContextRetrieval => "context_retrieval",
            RagOperation::EndToEndRag => "end_to_end_rag",
            RagOperation::BatchSearch => "batch_search",
            RagOperation::BatchRerank => "batch_rerank",
        }
    }
}

/// A single-query RAG request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagRequest {
    /// Operation to perform.
    pub operation: String,
    /// Query text.
    pub query: String,
    /// Free-form context.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// Collection to search; the engine default applies when empty.
    #[serde(default)]
    pub collection: String,
    /// Free-form options (`max_results`, `min_score`, `include_metadata`).
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
    /// Per-request pipeline overrides (recognized keys only).
    #[serde(default)]
    pub rag_config: HashMap<String, serde_json::Value>,
}

/// A batch RAG request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRagApiRequest {
    /// Operation to perform (`batch_search`, `batch_rerank`).
    pub operation: String,
    /// Query texts, in order.
    pub queries: Vec<String>,
    /// Context applied to every query.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// Collection to search; the engine default applies when empty.
    #[serde(default)]
    pub collection: String,
    /// Preferred batch size.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Concurrency bound for this request.
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    /// Per-request timeout.
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Free-form options.
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
    /// Per-request pipeline overrides (recognized keys only).
    #[serde(default)]
    pub rag_config: HashMap<String, serde_json::Value>,
}

/// Response envelope for RAG operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagOperationResponse {
    /// Echoed operation name.
    pub operation: String,
    /// Single-query response, when the operation produces one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<RagResponse>,
    /// Batch responses, in input order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<RagResponse>,
    /// Expansion terms, for `query_expansion`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expansion_terms: Vec<ExpansionTerm>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_index_wire_shape() {
        let json = serde_json::json!({
            "id": "docs",
            "type": "flat",
            "dimension": 384,
            "max_elements": 1000,
            "distance_metric": "cosine",
            "normalize": true,
            "m": 16,
            "ef_construction": 200,
            "ef_search": 100,
            "max_layers": 16,
            "num_clusters": 256,
            "cluster_size": 1000
        });

        let request: CreateIndexRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.id, "docs");
        assert_eq!(request.index_type.as_deref(), Some("flat"));
        assert_eq!(request.dimension, 384);
        assert!(request.normalize);

        let round = serde_json::to_value(&request).unwrap();
        assert_eq!(round["type"], "flat");
    }

    #[test]
    fn test_create_index_minimal() {
        let request: CreateIndexRequest =
            serde_json::from_value(serde_json::json!({"id": "docs", "dimension": 3})).unwrap();
        assert_eq!(request.max_elements, 0);
        assert!(!request.normalize);
        assert!(request.distance_metric.is_none());
    }

    #[test]
    fn test_rag_operation_names() {
        assert_eq!(
            serde_json::to_value(RagOperation::EndToEndRag).unwrap(),
            serde_json::json!("end_to_end_rag")
        );
        let op: RagOperation =
            serde_json::from_value(serde_json::json!("query_expansion")).unwrap();
        assert_eq!(op, RagOperation::QueryExpansion);
    }

    #[test]
    fn test_insert_vector_defaults() {
        let v: InsertVector = serde_json::from_value(serde_json::json!({
            "embedding": [0.1, 0.2]
        }))
        .unwrap();
        assert!(v.id.is_empty());
        assert!(v.collection.is_empty());
        assert!(v.metadata.is_empty());
    }
}
