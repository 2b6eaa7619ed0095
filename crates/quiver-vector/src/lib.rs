//! # quiver-vector
//!
//! A pure-Rust embedded vector index substrate: named collections of
//! identified `f64` vectors with exact similarity search.
//!
//! ## Features
//!
//! - **Pure Rust**: No native dependencies, compiles anywhere Rust does
//! - **Thread-Safe**: Concurrent readers with at-most-one writer per shard
//! - **Deterministic ordering**: Ties resolve by insertion order
//! - **Multiple Distance Metrics**: Cosine, Euclidean (L2), Dot Product, Manhattan (L1)
//!
//! ## Quick Start
//!
//! ```rust
//! use quiver_vector::{VectorStore, DistanceMetric, Vector, VectorMetadata};
//!
//! let store = VectorStore::new();
//! store.create_collection("documents", 3, DistanceMetric::Cosine)?;
//!
//! let vector = Vector::with_id(
//!     "doc1",
//!     "documents",
//!     vec![0.1, 0.2, 0.3],
//!     Some("hello".to_string()),
//!     VectorMetadata::new(),
//! );
//! store.insert(vector)?;
//!
//! let results = store.search("documents", &[0.1, 0.2, 0.3], 10)?;
//! assert_eq!(results[0].vector.id, "doc1");
//! # Ok::<(), quiver_vector::Error>(())
//! ```
//!
//! The index substrate behind a collection is chosen by [`IndexConfig`];
//! the exact linear scan is the reference implementation and the only one
//! currently built. Ordering, tie-breaking, and count behavior are part of
//! the [`index::VectorIndex`] contract, not the substrate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collection;
pub mod config;
pub mod distance;
pub mod error;
pub mod index;
pub mod types;

// Re-exports for convenience
pub use collection::Collection;
pub use config::{IndexConfig, IndexKind};
pub use distance::DistanceMetric;
pub use error::{Error, Result};
pub use index::{FlatIndex, SearchOptions, VectorIndex};
pub use types::{MetadataValue, SearchResult, Vector, VectorId, VectorMetadata};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// The main vector store instance.
///
/// `VectorStore` manages multiple collections, each containing vectors of a
/// specific dimensionality. All operations are thread-safe: the collection
/// map sits behind a reader-preferring lock and each collection's index
/// handles its own synchronization.
#[derive(Clone, Default)]
pub struct VectorStore {
    inner: Arc<VectorStoreInner>,
}

#[derive(Default)]
struct VectorStoreInner {
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl VectorStore {
    /// Create an empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new collection with the specified parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if a collection with the same name already exists.
    #[instrument(skip(self))]
    pub fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        self.create_collection_with_config(name, None, dimension, IndexConfig::flat(metric))
    }

    /// Create a new collection with a full index configuration.
    #[instrument(skip(self, config), fields(kind = %config.kind, metric = %config.metric))]
    pub fn create_collection_with_config(
        &self,
        name: &str,
        description: Option<String>,
        dimension: usize,
        config: IndexConfig,
    ) -> Result<()> {
        info!(name, dimension, "Creating collection");

        let collection = Collection::new(name.to_string(), description, dimension, config)?;

        let mut collections = self.inner.collections.write();
        if collections.contains_key(name) {
            return Err(Error::CollectionExists(name.to_string()));
        }
        collections.insert(name.to_string(), Arc::new(collection));
        Ok(())
    }

    /// Delete a collection and all its data.
    #[instrument(skip(self))]
    pub fn delete_collection(&self, name: &str) -> Result<()> {
        info!(name, "Deleting collection");

        if self.inner.collections.write().remove(name).is_none() {
            return Err(Error::CollectionNotFound(name.to_string()));
        }
        Ok(())
    }

    /// Check if a collection exists.
    pub fn collection_exists(&self, name: &str) -> bool {
        self.inner.collections.read().contains_key(name)
    }

    /// List all collection names.
    pub fn list_collections(&self) -> Vec<String> {
        self.inner.collections.read().keys().cloned().collect()
    }

    /// Get a reference to a collection.
    pub fn get_collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.inner
            .collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Insert a vector into its collection.
    ///
    /// The owning collection is taken from the vector itself. Dimension
    /// mismatches are rejected; re-inserting an existing id replaces the
    /// stored vector without changing the count.
    #[instrument(skip(self, vector), fields(collection = %vector.collection, id = %vector.id))]
    pub fn insert(&self, vector: Vector) -> Result<()> {
        let col = self.get_collection(&vector.collection)?;
        col.insert(vector)?;
        debug!("Inserted vector");
        Ok(())
    }

    /// Insert multiple vectors into a collection.
    ///
    /// # Returns
    ///
    /// The number of vectors successfully inserted.
    #[instrument(skip(self, vectors), fields(collection, count = vectors.len()))]
    pub fn insert_batch(&self, collection: &str, vectors: Vec<Vector>) -> Result<usize> {
        let col = self.get_collection(collection)?;
        let count = col.insert_batch(vectors)?;
        debug!(count, "Inserted batch");
        Ok(count)
    }

    /// Delete a vector from a collection.
    #[instrument(skip(self))]
    pub fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let col = self.get_collection(collection)?;
        col.delete(id)
    }

    /// Delete multiple vectors from a collection.
    ///
    /// # Returns
    ///
    /// The number of vectors actually deleted.
    #[instrument(skip(self, ids), fields(collection, count = ids.len()))]
    pub fn delete_batch(&self, collection: &str, ids: &[&str]) -> Result<usize> {
        let col = self.get_collection(collection)?;
        let count = col.delete_batch(ids)?;
        debug!(count, "Deleted batch");
        Ok(count)
    }

    /// Search for similar vectors.
    ///
    /// # Returns
    ///
    /// Results sorted by similarity (best first), ranks starting at 1.
    #[instrument(skip(self, query), fields(collection, k, dim = query.len()))]
    pub fn search(&self, collection: &str, query: &[f64], k: usize) -> Result<Vec<SearchResult>> {
        let col = self.get_collection(collection)?;
        let results = col.search(query, k)?;
        debug!(count = results.len(), "Search completed");
        Ok(results)
    }

    /// Search with a minimum score threshold.
    #[instrument(skip(self, query), fields(collection, k, min_score))]
    pub fn search_with_threshold(
        &self,
        collection: &str,
        query: &[f64],
        k: usize,
        min_score: f64,
    ) -> Result<Vec<SearchResult>> {
        let col = self.get_collection(collection)?;
        col.search_with_threshold(query, k, min_score)
    }

    /// Search with full options (threshold and metadata filter).
    pub fn search_with_options(
        &self,
        collection: &str,
        query: &[f64],
        k: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let col = self.get_collection(collection)?;
        col.search_with_options(query, k, options)
    }

    /// Get a vector by ID.
    pub fn get(&self, collection: &str, id: &str) -> Result<Option<Vector>> {
        let col = self.get_collection(collection)?;
        Ok(col.get(id))
    }

    /// Check if a vector exists.
    pub fn contains(&self, collection: &str, id: &str) -> Result<bool> {
        let col = self.get_collection(collection)?;
        Ok(col.contains(id))
    }

    /// Get the number of vectors in a collection.
    pub fn count(&self, collection: &str) -> Result<usize> {
        let col = self.get_collection(collection)?;
        Ok(col.len())
    }

    /// Get collection statistics.
    pub fn collection_stats(&self, collection: &str) -> Result<CollectionStats> {
        let col = self.get_collection(collection)?;
        Ok(col.stats())
    }
}

/// Statistics about a collection.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CollectionStats {
    /// Name of the collection.
    pub name: String,
    /// Number of vectors in the collection.
    pub vector_count: usize,
    /// Dimensionality of vectors.
    pub dimension: usize,
    /// Distance metric used.
    pub metric: DistanceMetric,
    /// Index substrate.
    pub index_kind: IndexKind,
    /// Approximate memory usage in bytes.
    pub memory_bytes: usize,
}
