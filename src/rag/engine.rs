//! RAG engine.
//!
//! The staged query pipeline: process → expand → embed → search → rerank →
//! respond. Expansion and reranking degrade gracefully (a failing strategy
//! is logged and skipped); embedding and search failures fail the query.

use crate::embedding::cache::fingerprint;
use crate::embedding::EmbeddingService;
use crate::rag::cache::{query_key, QueryCache, QueryCacheStats};
use crate::rag::expansion::{
    aggregate_terms, ContextAwareExpander, ExpansionTerm, QueryExpander, SemanticExpander,
    SynonymExpander,
};
use crate::rag::processor::{DefaultQueryProcessor, QueryProcessor};
use crate::rag::reranker::{
    ContextAwareReranker, ContextRerankerConfig, HybridReranker, HybridRerankerConfig, Reranker,
    SemanticReranker, SemanticRerankerConfig,
};
use crate::types::{
    EmbeddingRequest, QueryResult, QuiverError, RagQuery, RagResponse, RagStats, Result,
};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use quiver_vector::{MetadataValue, SearchOptions, VectorStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for the RAG engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Run the expander chain.
    #[serde(default = "default_true")]
    pub enable_query_expansion: bool,
    /// Run the reranker chain.
    #[serde(default = "default_true")]
    pub enable_reranking: bool,
    /// Install the context-aware expander and reranker.
    #[serde(default)]
    pub enable_context_aware: bool,
    /// Queries are truncated to this many characters.
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,
    /// Cap on aggregated expansion terms.
    #[serde(default = "default_max_expansion_terms")]
    pub max_expansion_terms: usize,
    /// Expansion terms below this confidence are dropped.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Concurrency bound for batch processing.
    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: usize,
    /// Per-query timeout. Zero disables.
    #[serde(default = "default_query_timeout")]
    pub query_timeout: Duration,
    /// Preferred batch size for downstream embedding calls.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Cache whole responses.
    #[serde(default = "default_true")]
    pub enable_cache: bool,
    /// Response cache TTL.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: Duration,
    /// Response cache entry bound.
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,
    /// Cap on results after reranking.
    #[serde(default = "default_max_reranked_results")]
    pub max_reranked_results: usize,
    /// Semantic reranker similarity floor.
    #[serde(default)]
    pub similarity_threshold: f64,
    /// Collection searched when a query does not name one.
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Embedding model; empty uses the provider default.
    #[serde(default)]
    pub embedding_model: String,
}

fn default_true() -> bool {
    true
}

fn default_max_query_length() -> usize {
    1000
}

fn default_max_expansion_terms() -> usize {
    10
}

fn default_min_confidence() -> f64 {
    0.5
}

fn default_max_concurrent_queries() -> usize {
    8
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_batch_size() -> usize {
    32
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_max_cache_size() -> usize {
    1000
}

fn default_max_reranked_results() -> usize {
    10
}

fn default_collection() -> String {
    "documents".to_string()
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enable_query_expansion: true,
            enable_reranking: true,
            enable_context_aware: false,
            max_query_length: default_max_query_length(),
            max_expansion_terms: default_max_expansion_terms(),
            min_confidence: default_min_confidence(),
            max_concurrent_queries: default_max_concurrent_queries(),
            query_timeout: default_query_timeout(),
            batch_size: default_batch_size(),
            enable_cache: true,
            cache_ttl: default_cache_ttl(),
            max_cache_size: default_max_cache_size(),
            max_reranked_results: default_max_reranked_results(),
            similarity_threshold: 0.0,
            collection: default_collection(),
            embedding_model: String::new(),
        }
    }
}

/// Staged RAG pipeline orchestrator.
///
/// Holds shared references to the embedding service and vector store;
/// processors, expanders, and rerankers are owned chains, installed from
/// the configuration flags and extensible before first use.
pub struct RagEngine {
    config: RagConfig,
    embedding: Arc<EmbeddingService>,
    store: VectorStore,
    processors: Vec<Box<dyn QueryProcessor>>,
    expanders: Vec<Box<dyn QueryExpander>>,
    rerankers: Vec<Box<dyn Reranker>>,
    cache: Option<QueryCache>,
    stats: Mutex<RagStats>,
}

impl RagEngine {
    /// Create an engine with the default strategy chains for the given
    /// configuration.
    pub fn new(config: RagConfig, embedding: Arc<EmbeddingService>, store: VectorStore) -> Self {
        let processors: Vec<Box<dyn QueryProcessor>> =
            vec![Box::new(DefaultQueryProcessor::new(config.max_query_length))];

        let mut expanders: Vec<Box<dyn QueryExpander>> = vec![
            Box::new(SynonymExpander::new()),
            Box::new(SemanticExpander::new()),
        ];
        if config.enable_context_aware {
            expanders.push(Box::new(ContextAwareExpander::new()));
        }

        let mut rerankers: Vec<Box<dyn Reranker>> =
            vec![Box::new(SemanticReranker::new(SemanticRerankerConfig {
                similarity_threshold: config.similarity_threshold,
            }))];
        if config.enable_context_aware {
            rerankers.push(Box::new(ContextAwareReranker::new(
                ContextRerankerConfig::default(),
            )));
        }
        rerankers.push(Box::new(HybridReranker::new(HybridRerankerConfig::default())));

        let cache = config
            .enable_cache
            .then(|| QueryCache::new(config.cache_ttl, config.max_cache_size));

        Self {
            embedding,
            store,
            processors,
            expanders,
            rerankers,
            cache,
            stats: Mutex::new(RagStats::default()),
            config,
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Install an additional query processor.
    pub fn add_processor(&mut self, processor: Box<dyn QueryProcessor>) {
        self.processors.push(processor);
        self.processors.sort_by_key(|p| p.priority());
    }

    /// Install an additional expander.
    pub fn add_expander(&mut self, expander: Box<dyn QueryExpander>) {
        self.expanders.push(expander);
    }

    /// Install an additional reranker.
    pub fn add_reranker(&mut self, reranker: Box<dyn Reranker>) {
        self.rerankers.push(reranker);
    }

    /// Process one query through the full pipeline.
    pub async fn process_query(
        &self,
        cancel: &CancellationToken,
        query: &RagQuery,
    ) -> Result<RagResponse> {
        if cancel.is_cancelled() {
            return Err(QuiverError::Cancelled);
        }
        if query.text.trim().is_empty() {
            return Err(QuiverError::EmptyInput);
        }

        self.stats.lock().total_queries += 1;

        let key = self.cache.as_ref().map(|_| query_key(query));
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(response) = cache.get(key) {
                self.stats.lock().cache_hits += 1;
                debug!(key = %key, "Query cache hit");
                return Ok(response);
            }
        }

        let started = Instant::now();
        let pipeline = self.run_pipeline(cancel, query.clone());

        let outcome = if self.config.query_timeout > Duration::ZERO {
            match tokio::time::timeout(self.config.query_timeout, pipeline).await {
                Ok(outcome) => outcome,
                Err(_) => Err(QuiverError::Timeout),
            }
        } else {
            pipeline.await
        };

        match outcome {
            Ok(mut response) => {
                response.processing_time = started.elapsed();

                if let (Some(cache), Some(key)) = (&self.cache, &key) {
                    cache.set(key, response.clone());
                }

                let mut stats = self.stats.lock();
                stats.successful_queries += 1;
                stats.total_latency += response.processing_time;
                stats.average_latency = stats.total_latency / stats.total_queries.max(1) as u32;
                Ok(response)
            }
            Err(e) => {
                self.stats.lock().failed_queries += 1;
                Err(e)
            }
        }
    }

    /// The pipeline stages after validation and cache lookup.
    async fn run_pipeline(
        &self,
        cancel: &CancellationToken,
        mut query: RagQuery,
    ) -> Result<RagResponse> {
        // Processor chain, ascending priority.
        for processor in &self.processors {
            query = processor.process(query)?;
        }

        // Expander chain; failures degrade to fewer terms.
        let mut expansion_terms: Vec<ExpansionTerm> = Vec::new();
        if self.config.enable_query_expansion {
            let mut raw = Vec::new();
            for expander in &self.expanders {
                match expander.expand(&query).await {
                    Ok(terms) => raw.extend(terms),
                    Err(e) => {
                        warn!(expander = expander.name(), error = %e, "Expander failed, skipping")
                    }
                }
            }
            expansion_terms = aggregate_terms(
                raw,
                self.config.min_confidence,
                self.config.max_expansion_terms,
            );
        }

        // Embedding is mandatory; failure fails the query. The fingerprint
        // key lets repeated query texts skip the provider even when the
        // response cache misses.
        let provider_tag = self.embedding.config().default_provider.clone();
        let request = EmbeddingRequest::new(
            vec![query.text.clone()],
            self.config.embedding_model.clone(),
        )
        .with_cache_key(fingerprint(
            &provider_tag,
            &self.config.embedding_model,
            &[query.text.as_str()],
        ));
        let embedded = self.embedding.generate_embeddings(cancel, &request).await?;
        let query_embedding = embedded
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| QuiverError::Internal("empty embedding response".to_string()))?;

        // Search is mandatory; failure fails the query.
        let collection = query
            .options
            .get("collection")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.config.collection)
            .to_string();
        let k = query.max_results.unwrap_or(10);
        let filter: Option<HashMap<String, MetadataValue>> = (!query.filters.is_empty())
            .then(|| {
                query
                    .filters
                    .iter()
                    .map(|(key, value)| (key.clone(), MetadataValue::from(value)))
                    .collect()
            });
        let options = SearchOptions {
            min_score: query.min_score,
            filter,
        };

        let hits = self
            .store
            .search_with_options(&collection, &query_embedding, k, &options)?;

        let mut results: Vec<QueryResult> = hits
            .into_iter()
            .map(|hit| QueryResult {
                id: hit.vector.id.clone(),
                text: hit.vector.text.clone(),
                score: hit.score,
                distance: hit.distance,
                relevance: 1.0 - hit.distance,
                metadata: query.include_metadata.then(|| hit.vector.metadata.clone()),
                embedding: hit.vector.embedding,
            })
            .collect();

        // Reranker chain; failures keep the previous ordering.
        let mut reranker_metadata = HashMap::new();
        if self.config.enable_reranking && results.len() >= 2 {
            let mut applied = Vec::new();
            for reranker in &self.rerankers {
                match reranker
                    .rerank(&query, &query_embedding, results.clone())
                    .await
                {
                    Ok(reranked) => {
                        results = reranked;
                        applied.push(reranker.name().to_string());
                    }
                    Err(e) => {
                        warn!(reranker = reranker.name(), error = %e, "Reranker failed, skipping")
                    }
                }
            }
            results.truncate(self.config.max_reranked_results);
            reranker_metadata.insert("rerankers".to_string(), serde_json::json!(applied));
        }

        let total_results = results.len();
        let mut metadata = HashMap::new();
        metadata.insert("collection".to_string(), serde_json::json!(collection));

        Ok(RagResponse {
            results,
            query,
            total_results,
            processing_time: Duration::ZERO, // stamped by the caller
            expansion_terms: expansion_terms.into_iter().map(|t| t.term).collect(),
            reranker_metadata,
            metadata,
        })
    }

    /// Run only the processor and expander stages for a query.
    ///
    /// Used by callers that want expansion terms without a search.
    pub async fn expand_query(&self, query: &RagQuery) -> Result<Vec<ExpansionTerm>> {
        let mut query = query.clone();
        for processor in &self.processors {
            query = processor.process(query)?;
        }

        let mut raw = Vec::new();
        for expander in &self.expanders {
            match expander.expand(&query).await {
                Ok(terms) => raw.extend(terms),
                Err(e) => {
                    warn!(expander = expander.name(), error = %e, "Expander failed, skipping")
                }
            }
        }
        Ok(aggregate_terms(
            raw,
            self.config.min_confidence,
            self.config.max_expansion_terms,
        ))
    }

    /// Process a batch of queries with bounded concurrency.
    ///
    /// Responses preserve input order; the first error (by input order)
    /// aborts the batch.
    pub async fn process_batch(
        &self,
        cancel: &CancellationToken,
        queries: Vec<RagQuery>,
    ) -> Result<Vec<RagResponse>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let mut outcomes: Vec<(usize, Result<RagResponse>)> =
            stream::iter(queries.into_iter().enumerate())
                .map(|(index, query)| async move {
                    (index, self.process_query(cancel, &query).await)
                })
                .buffer_unordered(self.config.max_concurrent_queries.max(1))
                .collect()
                .await;

        outcomes.sort_by_key(|(index, _)| *index);

        let mut responses = Vec::with_capacity(outcomes.len());
        for (_, outcome) in outcomes {
            responses.push(outcome?);
        }
        Ok(responses)
    }

    /// Snapshot of engine statistics.
    pub fn stats(&self) -> RagStats {
        self.stats.lock().clone()
    }

    /// Query cache statistics, when caching is enabled.
    pub fn cache_stats(&self) -> Option<QueryCacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    /// Drop all cached responses.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::local::LocalProvider;
    use crate::embedding::service::EmbeddingServiceConfig;
    use quiver_vector::{DistanceMetric, Vector, VectorMetadata};

    async fn seeded_engine(config: RagConfig) -> RagEngine {
        let service = EmbeddingService::new(EmbeddingServiceConfig::default()).unwrap();
        let provider = LocalProvider::with_defaults();
        let dimension = provider.dimension();
        service.register_provider(Arc::new(provider)).unwrap();
        let service = Arc::new(service);

        let store = VectorStore::new();
        store
            .create_collection("documents", dimension, DistanceMetric::Cosine)
            .unwrap();

        // Seed documents through the same provider the engine embeds with.
        let cancel = CancellationToken::new();
        let texts = [
            ("bread", "a simple recipe to bake bread at home"),
            ("cake", "chocolate cake baking instructions"),
            ("rust", "systems programming in rust"),
        ];
        for (id, text) in texts {
            let request =
                EmbeddingRequest::new(vec![text.to_string()], String::new());
            let response = service.generate_embeddings(&cancel, &request).await.unwrap();
            let mut metadata = VectorMetadata::new();
            metadata.insert("topic", id);
            store
                .insert(Vector::with_id(
                    id,
                    "documents",
                    response.embeddings[0].clone(),
                    Some(text.to_string()),
                    metadata,
                ))
                .unwrap();
        }

        RagEngine::new(config, service, store)
    }

    #[tokio::test]
    async fn test_end_to_end_query() {
        let engine = seeded_engine(RagConfig::default()).await;
        let cancel = CancellationToken::new();

        let query = RagQuery::new("how to bake bread")
            .with_context("domain", serde_json::json!("culinary"));
        let response = engine.process_query(&cancel, &query).await.unwrap();

        assert!(!response.results.is_empty());
        assert!(response.processing_time > Duration::ZERO);
        for expected in ["tutorial", "guide", "instructions", "steps"] {
            assert!(
                response.expansion_terms.iter().any(|t| t == expected),
                "missing expansion term {}",
                expected
            );
        }
        // Scores descending.
        for pair in response.results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_cache_returns_identical_response() {
        let engine = seeded_engine(RagConfig::default()).await;
        let cancel = CancellationToken::new();

        let query = RagQuery::new("how to bake bread");
        let first = engine.process_query(&cancel, &query).await.unwrap();
        let second = engine.process_query(&cancel, &query).await.unwrap();

        assert_eq!(engine.stats().cache_hits, 1);
        assert_eq!(first.results.len(), second.results.len());
        for (a, b) in first.results.iter().zip(second.results.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.score, b.score);
        }
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let engine = seeded_engine(RagConfig::default()).await;
        let cancel = CancellationToken::new();

        let result = engine.process_query(&cancel, &RagQuery::new("   ")).await;
        assert!(matches!(result, Err(QuiverError::EmptyInput)));
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let engine = seeded_engine(RagConfig::default()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine.process_query(&cancel, &RagQuery::new("q")).await;
        assert!(matches!(result, Err(QuiverError::Cancelled)));
    }

    #[tokio::test]
    async fn test_max_results_respected() {
        let engine = seeded_engine(RagConfig::default()).await;
        let cancel = CancellationToken::new();

        let query = RagQuery::new("baking").with_max_results(1);
        let response = engine.process_query(&cancel, &query).await.unwrap();
        assert_eq!(response.results.len(), 1);
    }

    #[tokio::test]
    async fn test_expansion_disabled() {
        let config = RagConfig {
            enable_query_expansion: false,
            ..Default::default()
        };
        let engine = seeded_engine(config).await;
        let cancel = CancellationToken::new();

        let response = engine
            .process_query(&cancel, &RagQuery::new("how to bake bread"))
            .await
            .unwrap();
        assert!(response.expansion_terms.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_included_on_request() {
        let engine = seeded_engine(RagConfig::default()).await;
        let cancel = CancellationToken::new();

        let mut query = RagQuery::new("bread recipe");
        query.include_metadata = true;
        let response = engine.process_query(&cancel, &query).await.unwrap();
        assert!(response.results[0].metadata.is_some());

        engine.clear_cache();
        query.include_metadata = false;
        let response = engine.process_query(&cancel, &query).await.unwrap();
        assert!(response.results[0].metadata.is_none());
    }

    #[tokio::test]
    async fn test_filters_restrict_results() {
        let engine = seeded_engine(RagConfig::default()).await;
        let cancel = CancellationToken::new();

        let mut query = RagQuery::new("baking");
        query
            .filters
            .insert("topic".to_string(), serde_json::json!("cake"));
        let response = engine.process_query(&cancel, &query).await.unwrap();

        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].id, "cake");
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let engine = seeded_engine(RagConfig::default()).await;
        let cancel = CancellationToken::new();

        let queries = vec![
            RagQuery::new("bread recipe"),
            RagQuery::new("rust programming"),
            RagQuery::new("chocolate cake"),
        ];
        let responses = engine.process_batch(&cancel, queries.clone()).await.unwrap();

        assert_eq!(responses.len(), 3);
        for (response, query) in responses.iter().zip(queries.iter()) {
            assert_eq!(response.query.text, query.text);
        }
    }

    #[tokio::test]
    async fn test_batch_aborts_on_error() {
        let engine = seeded_engine(RagConfig::default()).await;
        let cancel = CancellationToken::new();

        let queries = vec![RagQuery::new("fine"), RagQuery::new("  ")];
        let result = engine.process_batch(&cancel, queries).await;
        assert!(matches!(result, Err(QuiverError::EmptyInput)));
    }

    #[tokio::test]
    async fn test_stats_accumulate() {
        let engine = seeded_engine(RagConfig::default()).await;
        let cancel = CancellationToken::new();

        engine
            .process_query(&cancel, &RagQuery::new("bread"))
            .await
            .unwrap();
        let _ = engine.process_query(&cancel, &RagQuery::new("  ")).await;

        let stats = engine.stats();
        assert_eq!(stats.total_queries, 1);
        assert_eq!(stats.successful_queries, 1);
        assert_eq!(stats.failed_queries, 0);
        assert!(stats.average_latency > Duration::ZERO);
    }
}
