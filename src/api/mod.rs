//! Serving surface of the core.
//!
//! [`QuiverApi`] is what an HTTP layer (or any other shell) calls into:
//! wire-stable request types in [`types`], typed errors out, no transport
//! concerns. Status-code mapping is the shell's job.

pub mod types;

pub use types::{
    BatchRagApiRequest, CreateIndexRequest, InsertVector, RagOperation, RagOperationResponse,
    RagRequest, SearchHit,
};

use crate::batch::BatchProcessor;
use crate::rag::RagEngine;
use crate::types::{QuiverError, RagQuery, Result};
use quiver_vector::{
    DistanceMetric, IndexConfig, IndexKind, MetadataValue, Vector, VectorMetadata, VectorStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// The operations the core exposes to its serving layer.
pub struct QuiverApi {
    store: VectorStore,
    engine: Arc<RagEngine>,
    batch: Arc<BatchProcessor>,
}

impl QuiverApi {
    /// Assemble the facade and wire the batch processor to the engine.
    pub fn new(store: VectorStore, engine: Arc<RagEngine>, batch: Arc<BatchProcessor>) -> Self {
        batch.set_rag_engine(engine.clone());
        Self {
            store,
            engine,
            batch,
        }
    }

    /// The underlying vector store.
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// The RAG engine.
    pub fn engine(&self) -> &Arc<RagEngine> {
        &self.engine
    }

    /// The batch processor.
    pub fn batch(&self) -> &Arc<BatchProcessor> {
        &self.batch
    }

    /// Create an index (collection).
    #[instrument(skip(self, request), fields(id = %request.id, dimension = request.dimension))]
    pub fn create_index(&self, request: &CreateIndexRequest) -> Result<()> {
        let metric = match &request.distance_metric {
            Some(name) => name
                .parse::<DistanceMetric>()
                .map_err(QuiverError::Configuration)?,
            None => DistanceMetric::Cosine,
        };
        let kind = match &request.index_type {
            Some(name) => name
                .parse::<IndexKind>()
                .map_err(QuiverError::Configuration)?,
            None => IndexKind::Flat,
        };

        let mut config = IndexConfig {
            kind,
            metric,
            max_elements: request.max_elements,
            normalize: request.normalize,
            ..Default::default()
        };
        if let Some(m) = request.m {
            config.m = m;
        }
        if let Some(ef) = request.ef_construction {
            config.ef_construction = ef;
        }
        if let Some(ef) = request.ef_search {
            config.ef_search = ef;
        }
        if let Some(layers) = request.max_layers {
            config.max_layers = layers;
        }
        if let Some(clusters) = request.num_clusters {
            config.num_clusters = clusters;
        }
        if let Some(size) = request.cluster_size {
            config.cluster_size = size;
        }

        self.store
            .create_collection_with_config(&request.id, None, request.dimension, config)?;
        Ok(())
    }

    /// Insert vectors into an index.
    ///
    /// # Returns
    ///
    /// The number of vectors inserted.
    #[instrument(skip(self, vectors), fields(index_id, count = vectors.len()))]
    pub fn insert_vectors(&self, index_id: &str, vectors: Vec<InsertVector>) -> Result<usize> {
        let converted: Vec<Vector> = vectors
            .into_iter()
            .map(|wire| {
                let collection = if wire.collection.is_empty() {
                    index_id.to_string()
                } else {
                    wire.collection
                };
                let metadata = VectorMetadata {
                    data: wire
                        .metadata
                        .iter()
                        .map(|(k, v)| (k.clone(), MetadataValue::from(v)))
                        .collect(),
                };
                if wire.id.is_empty() {
                    Vector::new(collection, wire.embedding, None, metadata)
                } else {
                    Vector::with_id(wire.id, collection, wire.embedding, None, metadata)
                }
            })
            .collect();

        Ok(self.store.insert_batch(index_id, converted)?)
    }

    /// Search an index with a raw query vector.
    #[instrument(skip(self, query), fields(index_id, k, dim = query.len()))]
    pub fn search(&self, index_id: &str, query: &[f64], k: usize) -> Result<Vec<SearchHit>> {
        let results = self.store.search(index_id, query, k)?;
        Ok(results
            .into_iter()
            .map(|r| SearchHit {
                vector: r.vector,
                score: r.score,
                distance: r.distance,
            })
            .collect())
    }

    fn build_query(
        text: &str,
        collection: &str,
        context: &HashMap<String, serde_json::Value>,
        options: &HashMap<String, serde_json::Value>,
        rag_config: &HashMap<String, serde_json::Value>,
    ) -> RagQuery {
        let mut query = RagQuery::new(text);
        query.context = context.clone();

        let setting = |key: &str| options.get(key).or_else(|| rag_config.get(key)).cloned();
        if let Some(max) = setting("max_results").and_then(|v| v.as_u64()) {
            query.max_results = Some(max as usize);
        }
        if let Some(min) = setting("min_score").and_then(|v| v.as_f64()) {
            query.min_score = Some(min);
        }
        if let Some(include) = setting("include_metadata").and_then(|v| v.as_bool()) {
            query.include_metadata = include;
        }
        if !collection.is_empty() {
            query
                .options
                .insert("collection".to_string(), serde_json::json!(collection));
        }
        query
    }

    /// Execute a single-query RAG operation.
    #[instrument(skip(self, cancel, request), fields(operation = %request.operation))]
    pub async fn rag(
        &self,
        cancel: &CancellationToken,
        request: &RagRequest,
    ) -> Result<RagOperationResponse> {
        let operation: RagOperation =
            serde_json::from_value(serde_json::Value::String(request.operation.clone()))
                .map_err(|_| QuiverError::UnknownOperation(request.operation.clone()))?;

        let query = Self::build_query(
            &request.query,
            &request.collection,
            &request.context,
            &request.options,
            &request.rag_config,
        );

        let mut response = RagOperationResponse {
            operation: operation.name().to_string(),
            ..Default::default()
        };

        match operation {
            RagOperation::QueryExpansion => {
                response.expansion_terms = self.engine.expand_query(&query).await?;
            }
            RagOperation::ResultReranking
            | RagOperation::ContextRetrieval
            | RagOperation::EndToEndRag => {
                response.response = Some(self.engine.process_query(cancel, &query).await?);
            }
            RagOperation::BatchSearch | RagOperation::BatchRerank => {
                response.responses = self.engine.process_batch(cancel, vec![query]).await?;
            }
        }

        Ok(response)
    }

    /// Execute a batch RAG operation.
    #[instrument(skip(self, cancel, request), fields(operation = %request.operation, count = request.queries.len()))]
    pub async fn batch_rag(
        &self,
        cancel: &CancellationToken,
        request: &BatchRagApiRequest,
    ) -> Result<RagOperationResponse> {
        let operation: RagOperation =
            serde_json::from_value(serde_json::Value::String(request.operation.clone()))
                .map_err(|_| QuiverError::UnknownOperation(request.operation.clone()))?;

        if !matches!(
            operation,
            RagOperation::BatchSearch | RagOperation::BatchRerank
        ) {
            return Err(QuiverError::UnknownOperation(format!(
                "{} is not a batch operation",
                request.operation
            )));
        }
        if request.queries.is_empty() {
            return Err(QuiverError::EmptyInput);
        }

        let queries: Vec<RagQuery> = request
            .queries
            .iter()
            .map(|text| {
                Self::build_query(
                    text,
                    &request.collection,
                    &request.context,
                    &request.options,
                    &request.rag_config,
                )
            })
            .collect();

        let batch = self.engine.process_batch(cancel, queries);
        let responses = match request.timeout {
            Some(timeout) if timeout > Duration::ZERO => {
                tokio::time::timeout(timeout, batch)
                    .await
                    .map_err(|_| QuiverError::Timeout)??
            }
            _ => batch.await?,
        };

        Ok(RagOperationResponse {
            operation: operation.name().to_string(),
            responses,
            ..Default::default()
        })
    }
}
