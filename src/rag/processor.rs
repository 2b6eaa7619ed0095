//! Query processors.
//!
//! Pure transforms applied to a query before expansion and embedding,
//! ordered by ascending priority.

use crate::types::{RagQuery, Result};

/// A pure transform from query to query.
pub trait QueryProcessor: Send + Sync {
    /// Processor name for logs.
    fn name(&self) -> &str;

    /// Chain position; lower runs first.
    fn priority(&self) -> i32;

    /// Transform the query.
    fn process(&self, query: RagQuery) -> Result<RagQuery>;
}

/// Default processor: trims surrounding whitespace, collapses internal
/// whitespace runs, and truncates to the configured maximum length.
pub struct DefaultQueryProcessor {
    max_query_length: usize,
}

impl DefaultQueryProcessor {
    /// Create a processor with the given length cap.
    pub fn new(max_query_length: usize) -> Self {
        Self { max_query_length }
    }
}

impl QueryProcessor for DefaultQueryProcessor {
    fn name(&self) -> &str {
        "default"
    }

    fn priority(&self) -> i32 {
        0
    }

    fn process(&self, mut query: RagQuery) -> Result<RagQuery> {
        let normalized: String = query.text.split_whitespace().collect::<Vec<_>>().join(" ");
        query.text = if normalized.chars().count() > self.max_query_length {
            normalized.chars().take(self.max_query_length).collect()
        } else {
            normalized
        };
        Ok(query)
    }
}
