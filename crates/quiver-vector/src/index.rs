//! Index substrate.
//!
//! The [`VectorIndex`] trait is the substrate-agnostic contract every index
//! implementation satisfies: ordering, tie-breaking, and count behavior are
//! fixed here, the data structure is not. [`FlatIndex`] is the exact
//! linear-scan reference substrate.

use crate::config::{IndexConfig, IndexKind};
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::types::{MetadataValue, SearchResult, Vector, VectorId};
use chrono::Utc;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tracing::trace;

/// Optional constraints applied during a search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Drop results scoring below this threshold.
    pub min_score: Option<f64>,
    /// Require all listed metadata pairs to match.
    pub filter: Option<HashMap<String, MetadataValue>>,
}

/// Substrate-agnostic index contract.
///
/// Implementations must be safe under concurrent readers with at most one
/// writer at a time; readers never observe partially-inserted vectors.
/// Results are totally ordered by `(-score, insertion_order)` so equal
/// scores resolve deterministically.
pub trait VectorIndex: Send + Sync {
    /// Which substrate this index is.
    fn kind(&self) -> IndexKind;

    /// Dimensionality this index accepts.
    fn dimension(&self) -> usize;

    /// Distance metric in use.
    fn metric(&self) -> DistanceMetric;

    /// Insert a vector.
    ///
    /// Re-inserting an existing `id` replaces the embedding and metadata,
    /// bumps the update timestamp, and keeps the original creation
    /// timestamp, insertion order, and count.
    fn insert(&self, vector: Vector) -> Result<()>;

    /// Get a vector by id.
    fn get(&self, id: &str) -> Option<Vector>;

    /// Check if a vector exists.
    fn contains(&self, id: &str) -> bool;

    /// Search for the `k` most similar vectors, best first.
    ///
    /// `k == 0` yields an empty result; `k` larger than the index returns
    /// everything, sorted.
    fn search(&self, query: &[f64], k: usize) -> Result<Vec<SearchResult>> {
        self.search_with_options(query, k, &SearchOptions::default())
    }

    /// Search with a score threshold and/or metadata filter.
    fn search_with_options(
        &self,
        query: &[f64],
        k: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>>;

    /// Delete a vector by id.
    fn delete(&self, id: &str) -> Result<()>;

    /// Number of vectors in the index.
    fn len(&self) -> usize;

    /// Check if the index is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate memory usage in bytes.
    fn memory_usage(&self) -> usize;

    /// Remove all vectors.
    fn clear(&self);
}

/// Build an index for the given dimension and configuration.
///
/// The graph and clustered tags currently fall back to the flat substrate;
/// their tuning parameters are retained in the configuration.
pub fn build_index(dimension: usize, config: &IndexConfig) -> Result<FlatIndex> {
    FlatIndex::new(dimension, config.clone())
}

struct StoredEntry {
    vector: Vector,
    insertion_order: u64,
}

/// Exact linear-scan index.
///
/// Every search scores all stored vectors under the configured metric and
/// sorts by `(-score, insertion_order)`.
pub struct FlatIndex {
    entries: RwLock<HashMap<VectorId, StoredEntry>>,
    next_order: AtomicU64,
    dimension: usize,
    config: IndexConfig,
}

impl FlatIndex {
    /// Create a new flat index.
    pub fn new(dimension: usize, config: IndexConfig) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidVector("Dimensions must be > 0".to_string()));
        }

        Ok(Self {
            entries: RwLock::new(HashMap::new()),
            next_order: AtomicU64::new(0),
            dimension,
            config,
        })
    }

    fn validate(&self, embedding: &[f64]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        if embedding.iter().any(|v| v.is_nan() || v.is_infinite()) {
            return Err(Error::InvalidVector(
                "Vector contains NaN or Inf".to_string(),
            ));
        }
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Flat
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.config.metric
    }

    fn insert(&self, mut vector: Vector) -> Result<()> {
        self.validate(&vector.embedding)?;

        let mut entries = self.entries.write();

        if let Some(existing) = entries.get_mut(&vector.id) {
            // Replace in place: creation time and insertion order belong to
            // the stored record, not the incoming value.
            vector.created_at = existing.vector.created_at;
            let now = Utc::now();
            vector.updated_at = if now > existing.vector.updated_at {
                now
            } else {
                existing.vector.updated_at
            };
            existing.vector = vector;
            return Ok(());
        }

        if self.config.max_elements > 0 && entries.len() >= self.config.max_elements {
            return Err(Error::Index(format!(
                "Index is full ({} elements)",
                self.config.max_elements
            )));
        }

        let order = self.next_order.fetch_add(1, AtomicOrdering::SeqCst);
        trace!(id = %vector.id, order, "Inserted vector");
        entries.insert(
            vector.id.clone(),
            StoredEntry {
                vector,
                insertion_order: order,
            },
        );
        Ok(())
    }

    fn get(&self, id: &str) -> Option<Vector> {
        self.entries.read().get(id).map(|e| e.vector.clone())
    }

    fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    fn search_with_options(
        &self,
        query: &[f64],
        k: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        self.validate(query)?;

        if k == 0 {
            return Ok(Vec::new());
        }

        let metric = self.config.metric;
        let entries = self.entries.read();

        let mut scored: Vec<(f64, f64, u64, &StoredEntry)> = entries
            .values()
            .filter(|entry| match &options.filter {
                Some(filter) => entry.vector.metadata.matches(filter),
                None => true,
            })
            .map(|entry| {
                let score = metric.similarity(query, &entry.vector.embedding);
                let dist = metric.distance(query, &entry.vector.embedding);
                (score, dist, entry.insertion_order, entry)
            })
            .filter(|(score, _, _, _)| match options.min_score {
                Some(min) => *score >= min,
                None => true,
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.2.cmp(&b.2))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(i, (score, dist, _, entry))| SearchResult {
                vector: entry.vector.clone(),
                score,
                distance: dist,
                rank: i + 1,
            })
            .collect())
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.remove(id).is_none() {
            return Err(Error::VectorNotFound(id.to_string()));
        }
        trace!(id, "Deleted vector");
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn memory_usage(&self) -> usize {
        let entries = self.entries.read();
        let vector_bytes: usize = entries
            .values()
            .map(|e| e.vector.embedding.len() * std::mem::size_of::<f64>())
            .sum();
        let id_bytes: usize = entries.keys().map(|s| s.len()).sum();
        let meta_bytes: usize = entries
            .values()
            .map(|e| e.vector.metadata.len() * 48)
            .sum();
        vector_bytes + id_bytes + meta_bytes
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}
