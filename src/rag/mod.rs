//! Retrieval-augmented generation pipeline.
//!
//! A query moves through a staged pipeline:
//!
//! 1. **Processing** - normalize and truncate ([`processor`])
//! 2. **Expansion** - produce extra terms, bounded ([`expansion`])
//! 3. **Embedding** - via the embedding service (mandatory)
//! 4. **Search** - against the vector store (mandatory)
//! 5. **Reranking** - semantic/context/hybrid rescoring ([`reranker`])
//! 6. **Response** - cached under a SHA-256 query key ([`cache`])
//!
//! Expansion and reranking are best-effort: a failing strategy is logged
//! and skipped, the pipeline degrades to what remains. Embedding and
//! search failures fail the query.

pub mod cache;
pub mod engine;
pub mod expansion;
pub mod processor;
pub mod reranker;

pub use cache::{query_key, QueryCache, QueryCacheStats};
pub use engine::{RagConfig, RagEngine};
pub use expansion::{
    aggregate_terms, ContextAwareExpander, ExpansionTerm, QueryExpander, SemanticExpander,
    SynonymExpander,
};
pub use processor::{DefaultQueryProcessor, QueryProcessor};
pub use reranker::{
    ContextAwareReranker, ContextRerankerConfig, ContextScorer, ContextScoring, HybridReranker,
    HybridRerankerConfig, Reranker, SemanticReranker, SemanticRerankerConfig,
};
