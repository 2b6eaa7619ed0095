//! Query expansion strategies.
//!
//! Expanders produce extra search terms with confidence scores. The engine
//! aggregates all expansions, deduplicates preserving first occurrence,
//! drops terms below its confidence floor, and caps the total.

use crate::embedding::EmbeddingService;
use crate::types::{EmbeddingRequest, RagQuery, Result};
use async_trait::async_trait;
use quiver_vector::distance::cosine_similarity;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// An expansion term with its confidence and producing strategy.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExpansionTerm {
    /// The extra search term.
    pub term: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Name of the expander that produced it.
    pub source: String,
}

/// A query expansion strategy.
#[async_trait]
pub trait QueryExpander: Send + Sync {
    /// Expander name for logs and term attribution.
    fn name(&self) -> &str;

    /// Produce expansion terms for a query.
    async fn expand(&self, query: &RagQuery) -> Result<Vec<ExpansionTerm>>;
}

// ============================================================================
// Synonym Expander
// ============================================================================

/// Dictionary lookup over whitespace-split lowercased text.
pub struct SynonymExpander {
    synonyms: HashMap<String, Vec<String>>,
    confidence: f64,
}

impl SynonymExpander {
    /// Create an expander with the built-in dictionary.
    pub fn new() -> Self {
        let mut synonyms = HashMap::new();
        for (word, entries) in [
            ("fast", vec!["quick", "rapid", "speedy"]),
            ("big", vec!["large", "huge", "massive"]),
            ("small", vec!["little", "tiny", "compact"]),
            ("search", vec!["find", "lookup", "query"]),
            ("make", vec!["create", "build", "produce"]),
            ("fix", vec!["repair", "resolve", "correct"]),
            ("error", vec!["failure", "fault", "problem"]),
            ("improve", vec!["enhance", "optimize", "refine"]),
        ] {
            synonyms.insert(
                word.to_string(),
                entries.into_iter().map(String::from).collect(),
            );
        }
        Self {
            synonyms,
            confidence: 0.8,
        }
    }

    /// Extend the dictionary.
    pub fn with_synonyms<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (word, list) in entries {
            self.synonyms
                .insert(word.into(), list.into_iter().map(Into::into).collect());
        }
        self
    }
}

impl Default for SynonymExpander {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryExpander for SynonymExpander {
    fn name(&self) -> &str {
        "synonym"
    }

    async fn expand(&self, query: &RagQuery) -> Result<Vec<ExpansionTerm>> {
        let mut terms = Vec::new();
        for word in query.text.to_lowercase().split_whitespace() {
            if let Some(entries) = self.synonyms.get(word) {
                for entry in entries {
                    terms.push(ExpansionTerm {
                        term: entry.clone(),
                        confidence: self.confidence,
                        source: self.name().to_string(),
                    });
                }
            }
        }
        Ok(terms)
    }
}

// ============================================================================
// Semantic Expander
// ============================================================================

/// Pattern-driven variations, optionally rescored by embedding similarity.
pub struct SemanticExpander {
    patterns: Vec<(&'static str, Vec<&'static str>)>,
    confidence: f64,
    embedding: Option<Arc<EmbeddingService>>,
}

impl SemanticExpander {
    /// Create a pattern-only expander.
    pub fn new() -> Self {
        Self {
            patterns: vec![
                ("how to", vec!["tutorial", "guide", "instructions", "steps"]),
                (
                    "what is",
                    vec!["definition", "explanation", "description", "meaning"],
                ),
                ("why", vec!["reason", "cause", "rationale"]),
                ("best", vec!["top", "recommended", "popular"]),
                ("compare", vec!["comparison", "difference", "versus"]),
                ("install", vec!["setup", "configuration", "deployment"]),
            ],
            confidence: 0.7,
            embedding: None,
        }
    }

    /// Rescore pattern terms by embedding similarity against the query.
    pub fn with_embedding_service(mut self, service: Arc<EmbeddingService>) -> Self {
        self.embedding = Some(service);
        self
    }

    async fn rescore(
        &self,
        service: &EmbeddingService,
        query_text: &str,
        terms: &mut [ExpansionTerm],
    ) -> Result<()> {
        let mut texts = vec![query_text.to_string()];
        texts.extend(terms.iter().map(|t| t.term.clone()));

        let cancel = CancellationToken::new();
        let request = EmbeddingRequest::new(texts, "");
        let response = service.generate_embeddings(&cancel, &request).await?;

        let query_row = &response.embeddings[0];
        for (term, row) in terms.iter_mut().zip(response.embeddings[1..].iter()) {
            // Map cosine [-1, 1] into a [0, 1] confidence.
            let similarity = cosine_similarity(query_row, row);
            term.confidence = ((similarity + 1.0) / 2.0).clamp(0.0, 1.0);
        }
        Ok(())
    }
}

impl Default for SemanticExpander {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryExpander for SemanticExpander {
    fn name(&self) -> &str {
        "semantic"
    }

    async fn expand(&self, query: &RagQuery) -> Result<Vec<ExpansionTerm>> {
        let lowered = query.text.to_lowercase();
        let mut terms: Vec<ExpansionTerm> = Vec::new();

        for (pattern, variations) in &self.patterns {
            if lowered.contains(pattern) {
                for variation in variations {
                    terms.push(ExpansionTerm {
                        term: (*variation).to_string(),
                        confidence: self.confidence,
                        source: self.name().to_string(),
                    });
                }
            }
        }

        if let Some(service) = &self.embedding {
            if !terms.is_empty() {
                if let Err(e) = self.rescore(service, &query.text, &mut terms).await {
                    debug!(error = %e, "Embedding rescore skipped");
                }
            }
        }

        Ok(terms)
    }
}

// ============================================================================
// Context-Aware Expander
// ============================================================================

/// Derives terms from the query's context map.
///
/// Reads `user_preferences` (array of strings), `domain`, `time_context`,
/// and `location`.
pub struct ContextAwareExpander {
    confidence: f64,
}

impl ContextAwareExpander {
    /// Create a context-aware expander.
    pub fn new() -> Self {
        Self { confidence: 0.6 }
    }
}

impl Default for ContextAwareExpander {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryExpander for ContextAwareExpander {
    fn name(&self) -> &str {
        "context"
    }

    async fn expand(&self, query: &RagQuery) -> Result<Vec<ExpansionTerm>> {
        let mut terms = Vec::new();
        let mut push = |term: &str, confidence: f64| {
            terms.push(ExpansionTerm {
                term: term.to_string(),
                confidence,
                source: "context".to_string(),
            });
        };

        if let Some(preferences) = query.context.get("user_preferences") {
            if let Some(list) = preferences.as_array() {
                for preference in list.iter().filter_map(|v| v.as_str()) {
                    push(preference, self.confidence);
                }
            }
        }
        if let Some(domain) = query.context.get("domain").and_then(|v| v.as_str()) {
            push(domain, self.confidence + 0.1);
        }
        if let Some(time) = query.context.get("time_context").and_then(|v| v.as_str()) {
            push(time, self.confidence);
        }
        if let Some(location) = query.context.get("location").and_then(|v| v.as_str()) {
            push(location, self.confidence);
        }

        Ok(terms)
    }
}

/// Aggregate expansions: dedup preserving first occurrence, drop below the
/// confidence floor, cap the total.
pub fn aggregate_terms(
    terms: Vec<ExpansionTerm>,
    min_confidence: f64,
    max_terms: usize,
) -> Vec<ExpansionTerm> {
    let mut seen = std::collections::HashSet::new();
    let mut aggregated = Vec::new();
    for term in terms {
        if term.confidence < min_confidence {
            continue;
        }
        let key = term.term.to_lowercase();
        if seen.insert(key) {
            aggregated.push(term);
        }
        if aggregated.len() == max_terms {
            break;
        }
    }
    aggregated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synonym_expander() {
        let expander = SynonymExpander::new();
        let terms = expander
            .expand(&RagQuery::new("how to fix a big error"))
            .await
            .unwrap();

        let words: Vec<&str> = terms.iter().map(|t| t.term.as_str()).collect();
        assert!(words.contains(&"repair"));
        assert!(words.contains(&"large"));
        assert!(words.contains(&"failure"));
        assert!(terms.iter().all(|t| t.source == "synonym"));
    }

    #[tokio::test]
    async fn test_synonym_expander_custom_dictionary() {
        let expander =
            SynonymExpander::new().with_synonyms([("bread", vec!["loaf", "sourdough"])]);
        let terms = expander.expand(&RagQuery::new("bake BREAD")).await.unwrap();
        let words: Vec<&str> = terms.iter().map(|t| t.term.as_str()).collect();
        assert!(words.contains(&"loaf"));
    }

    #[tokio::test]
    async fn test_semantic_expander_how_to() {
        let expander = SemanticExpander::new();
        let terms = expander
            .expand(&RagQuery::new("How to bake bread"))
            .await
            .unwrap();

        let words: Vec<&str> = terms.iter().map(|t| t.term.as_str()).collect();
        for expected in ["tutorial", "guide", "instructions", "steps"] {
            assert!(words.contains(&expected), "missing {}", expected);
        }
    }

    #[tokio::test]
    async fn test_semantic_expander_what_is() {
        let expander = SemanticExpander::new();
        let terms = expander
            .expand(&RagQuery::new("what is a vector database"))
            .await
            .unwrap();

        let words: Vec<&str> = terms.iter().map(|t| t.term.as_str()).collect();
        for expected in ["definition", "explanation", "description", "meaning"] {
            assert!(words.contains(&expected), "missing {}", expected);
        }
    }

    #[tokio::test]
    async fn test_semantic_expander_no_pattern() {
        let expander = SemanticExpander::new();
        let terms = expander.expand(&RagQuery::new("bread")).await.unwrap();
        assert!(terms.is_empty());
    }

    #[tokio::test]
    async fn test_context_expander() {
        let query = RagQuery::new("recipes")
            .with_context("domain", serde_json::json!("culinary"))
            .with_context("location", serde_json::json!("paris"))
            .with_context("user_preferences", serde_json::json!(["vegan", "quick"]));

        let expander = ContextAwareExpander::new();
        let terms = expander.expand(&query).await.unwrap();

        let words: Vec<&str> = terms.iter().map(|t| t.term.as_str()).collect();
        assert!(words.contains(&"culinary"));
        assert!(words.contains(&"paris"));
        assert!(words.contains(&"vegan"));
        assert!(words.contains(&"quick"));
    }

    #[tokio::test]
    async fn test_context_expander_empty_context() {
        let expander = ContextAwareExpander::new();
        let terms = expander.expand(&RagQuery::new("q")).await.unwrap();
        assert!(terms.is_empty());
    }

    #[test]
    fn test_aggregate_dedup_preserves_first_occurrence() {
        let term = |t: &str, c: f64, s: &str| ExpansionTerm {
            term: t.to_string(),
            confidence: c,
            source: s.to_string(),
        };

        let aggregated = aggregate_terms(
            vec![
                term("guide", 0.7, "semantic"),
                term("Guide", 0.9, "synonym"),
                term("steps", 0.7, "semantic"),
                term("weak", 0.2, "context"),
            ],
            0.5,
            10,
        );

        assert_eq!(aggregated.len(), 2);
        assert_eq!(aggregated[0].term, "guide");
        assert_eq!(aggregated[0].source, "semantic");
        assert_eq!(aggregated[1].term, "steps");
    }

    #[test]
    fn test_aggregate_caps_terms() {
        let terms: Vec<ExpansionTerm> = (0..20)
            .map(|i| ExpansionTerm {
                term: format!("term-{}", i),
                confidence: 0.9,
                source: "semantic".to_string(),
            })
            .collect();

        let aggregated = aggregate_terms(terms, 0.5, 5);
        assert_eq!(aggregated.len(), 5);
        assert_eq!(aggregated[0].term, "term-0");
    }
}
