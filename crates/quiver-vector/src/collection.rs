//! Vector collection.
//!
//! A collection is a named container for vectors with a fixed
//! dimensionality, a distance metric, and an index substrate.

use crate::config::{IndexConfig, IndexKind};
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::index::{build_index, SearchOptions, VectorIndex};
use crate::types::{SearchResult, Vector};
use crate::CollectionStats;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// A named collection of vectors.
pub struct Collection {
    /// Collection name.
    name: String,
    /// Optional description.
    description: Option<String>,
    /// Vector dimensions.
    dimension: usize,
    /// Index configuration.
    config: IndexConfig,
    /// The underlying index substrate.
    index: Arc<dyn VectorIndex>,
    /// Creation timestamp.
    created_at: DateTime<Utc>,
    /// Last-update timestamp, bumped on every write operation.
    updated_at: RwLock<DateTime<Utc>>,
}

impl Collection {
    /// Create a new collection.
    pub fn new(
        name: String,
        description: Option<String>,
        dimension: usize,
        config: IndexConfig,
    ) -> Result<Self> {
        let index = build_index(dimension, &config)?;
        let now = Utc::now();

        Ok(Self {
            name,
            description,
            dimension,
            config,
            index: Arc::new(index),
            created_at: now,
            updated_at: RwLock::new(now),
        })
    }

    /// Get the collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the collection description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Get the vector dimensions.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Get the distance metric.
    pub fn metric(&self) -> DistanceMetric {
        self.config.metric
    }

    /// Get the index kind.
    pub fn index_kind(&self) -> IndexKind {
        self.index.kind()
    }

    /// Get the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the last-update timestamp.
    pub fn updated_at(&self) -> DateTime<Utc> {
        *self.updated_at.read()
    }

    /// Get the number of vectors in the collection.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn touch(&self) {
        let now = Utc::now();
        let mut updated = self.updated_at.write();
        if now > *updated {
            *updated = now;
        }
    }

    /// Insert a vector.
    ///
    /// The vector's collection tag must match, as must its dimension. When
    /// the collection is configured with normalize-on-insert, the stored
    /// copy is scaled to unit magnitude.
    pub fn insert(&self, mut vector: Vector) -> Result<()> {
        if vector.collection != self.name {
            return Err(Error::Configuration(format!(
                "Vector belongs to collection '{}', not '{}'",
                vector.collection, self.name
            )));
        }
        if self.config.normalize {
            vector.normalize();
        }
        self.index.insert(vector)?;
        self.touch();
        Ok(())
    }

    /// Insert multiple vectors, returning the number inserted.
    ///
    /// Stops at the first invalid vector.
    pub fn insert_batch(&self, vectors: Vec<Vector>) -> Result<usize> {
        let mut count = 0;
        for vector in vectors {
            self.insert(vector)?;
            count += 1;
        }
        Ok(count)
    }

    /// Delete a vector.
    pub fn delete(&self, id: &str) -> Result<()> {
        self.index.delete(id)?;
        self.touch();
        Ok(())
    }

    /// Delete multiple vectors, returning the number actually deleted.
    pub fn delete_batch(&self, ids: &[&str]) -> Result<usize> {
        let mut count = 0;
        for id in ids {
            match self.index.delete(id) {
                Ok(()) => count += 1,
                Err(Error::VectorNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if count > 0 {
            self.touch();
        }
        Ok(count)
    }

    /// Search for similar vectors.
    pub fn search(&self, query: &[f64], k: usize) -> Result<Vec<SearchResult>> {
        self.index.search(query, k)
    }

    /// Search with a minimum score threshold.
    pub fn search_with_threshold(
        &self,
        query: &[f64],
        k: usize,
        min_score: f64,
    ) -> Result<Vec<SearchResult>> {
        self.index.search_with_options(
            query,
            k,
            &SearchOptions {
                min_score: Some(min_score),
                filter: None,
            },
        )
    }

    /// Search with full options.
    pub fn search_with_options(
        &self,
        query: &[f64],
        k: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        self.index.search_with_options(query, k, options)
    }

    /// Get a vector by ID.
    pub fn get(&self, id: &str) -> Option<Vector> {
        self.index.get(id)
    }

    /// Check if a vector exists.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Get collection statistics.
    pub fn stats(&self) -> CollectionStats {
        CollectionStats {
            name: self.name.clone(),
            vector_count: self.index.len(),
            dimension: self.dimension,
            metric: self.config.metric,
            index_kind: self.index.kind(),
            memory_bytes: self.index.memory_usage(),
        }
    }

    /// Get the index configuration.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }
}
