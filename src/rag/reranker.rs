//! Result reranking strategies.
//!
//! Rerankers reorder search results after retrieval. Under identical
//! scores the order is pinned: descending final score, then original
//! position, then id lexicographic.

use crate::types::{QueryResult, QuiverError, RagQuery, Result};
use async_trait::async_trait;
use quiver_vector::distance::cosine_similarity;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// A result reranking strategy.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Reranker name for logs and response metadata.
    fn name(&self) -> &str;

    /// Reorder (and possibly drop or rescore) results.
    ///
    /// `query_embedding` is the embedding of the processed query text.
    async fn rerank(
        &self,
        query: &RagQuery,
        query_embedding: &[f64],
        results: Vec<QueryResult>,
    ) -> Result<Vec<QueryResult>>;
}

/// Sort results by (score desc, original position asc, id lexicographic).
fn sort_pinned(results: &mut [(usize, QueryResult)]) {
    results.sort_by(|(pos_a, a), (pos_b, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| pos_a.cmp(pos_b))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn into_sorted(results: Vec<QueryResult>) -> Vec<QueryResult> {
    let mut indexed: Vec<(usize, QueryResult)> = results.into_iter().enumerate().collect();
    sort_pinned(&mut indexed);
    indexed.into_iter().map(|(_, r)| r).collect()
}

// ============================================================================
// Semantic Reranker
// ============================================================================

/// Configuration for [`SemanticReranker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticRerankerConfig {
    /// Results scoring below this similarity are dropped.
    #[serde(default)]
    pub similarity_threshold: f64,
}

impl Default for SemanticRerankerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.0,
        }
    }
}

/// Rescores results by cosine similarity of the query embedding against
/// each result's embedding.
pub struct SemanticReranker {
    config: SemanticRerankerConfig,
}

impl SemanticReranker {
    /// Create a semantic reranker.
    pub fn new(config: SemanticRerankerConfig) -> Self {
        Self { config }
    }
}

impl Default for SemanticReranker {
    fn default() -> Self {
        Self::new(SemanticRerankerConfig::default())
    }
}

#[async_trait]
impl Reranker for SemanticReranker {
    fn name(&self) -> &str {
        "semantic"
    }

    async fn rerank(
        &self,
        _query: &RagQuery,
        query_embedding: &[f64],
        results: Vec<QueryResult>,
    ) -> Result<Vec<QueryResult>> {
        let rescored: Vec<QueryResult> = results
            .into_iter()
            .map(|mut result| {
                if result.embedding.len() == query_embedding.len()
                    && !query_embedding.is_empty()
                {
                    result.score = cosine_similarity(query_embedding, &result.embedding);
                }
                result
            })
            .filter(|result| result.score >= self.config.similarity_threshold)
            .collect();

        Ok(into_sorted(rescored))
    }
}

// ============================================================================
// Context-Aware Reranker
// ============================================================================

/// Scores one context dimension of a result.
///
/// The built-in dimensions (`user_history`, `domain`, `time_context`,
/// `location`) ship as explicit [`QuiverError::Unimplemented`] strategies:
/// the configuration surface exists, the scoring does not. Supply real
/// scorers through [`ContextScoring::with_scorer`].
pub trait ContextScorer: Send + Sync {
    /// Score a result for one context value, in `[0, 1]`.
    fn score(&self, context_value: &serde_json::Value, result: &QueryResult) -> Result<f64>;
}

struct UnimplementedScorer(&'static str);

impl ContextScorer for UnimplementedScorer {
    fn score(&self, _context_value: &serde_json::Value, _result: &QueryResult) -> Result<f64> {
        Err(QuiverError::Unimplemented(format!(
            "context scorer '{}'",
            self.0
        )))
    }
}

/// Weighted table of per-dimension context scorers.
pub struct ContextScoring {
    scorers: HashMap<String, (f64, Box<dyn ContextScorer>)>,
}

impl ContextScoring {
    /// Create the default table: the four standard dimensions, equally
    /// weighted, all unimplemented.
    pub fn new() -> Self {
        let mut scorers: HashMap<String, (f64, Box<dyn ContextScorer>)> = HashMap::new();
        for key in ["user_history", "domain", "time_context", "location"] {
            scorers.insert(key.to_string(), (0.25, Box::new(UnimplementedScorer(key))));
        }
        Self { scorers }
    }

    /// Install a scorer for one dimension.
    pub fn with_scorer(
        mut self,
        key: impl Into<String>,
        weight: f64,
        scorer: Box<dyn ContextScorer>,
    ) -> Self {
        self.scorers.insert(key.into(), (weight, scorer));
        self
    }

    /// Weighted context relevance of a result, or `None` when no dimension
    /// present in the query produced a score.
    fn relevance(&self, query: &RagQuery, result: &QueryResult) -> Option<f64> {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;

        for (key, value) in &query.context {
            let Some((weight, scorer)) = self.scorers.get(key) else {
                continue;
            };
            match scorer.score(value, result) {
                Ok(score) => {
                    weighted += weight * score.clamp(0.0, 1.0);
                    total_weight += weight;
                }
                Err(QuiverError::Unimplemented(which)) => {
                    debug!(scorer = %which, "Skipping unimplemented context scorer");
                }
                Err(e) => {
                    debug!(key, error = %e, "Context scorer failed");
                }
            }
        }

        (total_weight > 0.0).then_some(weighted / total_weight)
    }
}

impl Default for ContextScoring {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for [`ContextAwareReranker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRerankerConfig {
    /// Blend factor: `score = (1 − w)·score + w·context_relevance`.
    #[serde(default = "default_context_influence")]
    pub context_influence: f64,
}

fn default_context_influence() -> f64 {
    0.3
}

impl Default for ContextRerankerConfig {
    fn default() -> Self {
        Self {
            context_influence: default_context_influence(),
        }
    }
}

/// Blends each result's score with its weighted context relevance.
///
/// Results without any scorable context dimension keep their score, so the
/// default (all-unimplemented) table leaves ordering untouched.
pub struct ContextAwareReranker {
    config: ContextRerankerConfig,
    scoring: ContextScoring,
}

impl ContextAwareReranker {
    /// Create a context-aware reranker with the default scorer table.
    pub fn new(config: ContextRerankerConfig) -> Self {
        Self {
            config,
            scoring: ContextScoring::new(),
        }
    }

    /// Replace the scorer table.
    pub fn with_scoring(mut self, scoring: ContextScoring) -> Self {
        self.scoring = scoring;
        self
    }
}

impl Default for ContextAwareReranker {
    fn default() -> Self {
        Self::new(ContextRerankerConfig::default())
    }
}

#[async_trait]
impl Reranker for ContextAwareReranker {
    fn name(&self) -> &str {
        "context"
    }

    async fn rerank(
        &self,
        query: &RagQuery,
        _query_embedding: &[f64],
        results: Vec<QueryResult>,
    ) -> Result<Vec<QueryResult>> {
        let influence = self.config.context_influence.clamp(0.0, 1.0);
        let blended: Vec<QueryResult> = results
            .into_iter()
            .map(|mut result| {
                if let Some(relevance) = self.scoring.relevance(query, &result) {
                    result.score = (1.0 - influence) * result.score + influence * relevance;
                }
                result
            })
            .collect();

        Ok(into_sorted(blended))
    }
}

// ============================================================================
// Hybrid Reranker
// ============================================================================

/// Configuration for [`HybridReranker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridRerankerConfig {
    /// Weight of the incoming vector score.
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    /// Weight of the recomputed semantic similarity.
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    /// Weight of the context relevance.
    #[serde(default = "default_context_weight")]
    pub context_weight: f64,
}

fn default_vector_weight() -> f64 {
    0.6
}

fn default_semantic_weight() -> f64 {
    0.3
}

fn default_context_weight() -> f64 {
    0.1
}

impl Default for HybridRerankerConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            semantic_weight: default_semantic_weight(),
            context_weight: default_context_weight(),
        }
    }
}

/// Combines vector score, semantic similarity, and context relevance into
/// one weighted score.
pub struct HybridReranker {
    config: HybridRerankerConfig,
    scoring: ContextScoring,
}

impl HybridReranker {
    /// Create a hybrid reranker with the default scorer table.
    pub fn new(config: HybridRerankerConfig) -> Self {
        Self {
            config,
            scoring: ContextScoring::new(),
        }
    }

    /// Replace the scorer table.
    pub fn with_scoring(mut self, scoring: ContextScoring) -> Self {
        self.scoring = scoring;
        self
    }
}

impl Default for HybridReranker {
    fn default() -> Self {
        Self::new(HybridRerankerConfig::default())
    }
}

#[async_trait]
impl Reranker for HybridReranker {
    fn name(&self) -> &str {
        "hybrid"
    }

    async fn rerank(
        &self,
        query: &RagQuery,
        query_embedding: &[f64],
        results: Vec<QueryResult>,
    ) -> Result<Vec<QueryResult>> {
        let combined: Vec<QueryResult> = results
            .into_iter()
            .map(|mut result| {
                let semantic = if result.embedding.len() == query_embedding.len()
                    && !query_embedding.is_empty()
                {
                    cosine_similarity(query_embedding, &result.embedding)
                } else {
                    0.0
                };
                let context = self.scoring.relevance(query, &result).unwrap_or(0.0);

                result.score = self.config.vector_weight * result.score
                    + self.config.semantic_weight * semantic
                    + self.config.context_weight * context;
                result
            })
            .collect();

        Ok(into_sorted(combined))
    }
}
