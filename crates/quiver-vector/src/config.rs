//! Configuration for quiver-vector.

use crate::distance::DistanceMetric;

/// Index substrate selector.
///
/// Only the flat (linear scan) substrate is implemented; the graph and
/// clustered tags are accepted so that tuning parameters survive a future
/// substrate swap without a config migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum IndexKind {
    /// Exact linear scan over all vectors.
    #[default]
    Flat,
    /// Hierarchical navigable small world graph.
    Hnsw,
    /// Inverted file / clustered index.
    Ivf,
}

impl IndexKind {
    /// Get the name of this index kind.
    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::Flat => "flat",
            IndexKind::Hnsw => "hnsw",
            IndexKind::Ivf => "ivf",
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for IndexKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "flat" | "linear" | "exact" => Ok(IndexKind::Flat),
            "hnsw" | "graph" => Ok(IndexKind::Hnsw),
            "ivf" | "clustered" => Ok(IndexKind::Ivf),
            _ => Err(format!("Unknown index kind: {}", s)),
        }
    }
}

/// Configuration for a collection's index.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndexConfig {
    /// Which substrate to build.
    pub kind: IndexKind,

    /// Distance metric for similarity calculations.
    pub metric: DistanceMetric,

    /// Maximum number of vectors (0 = unlimited).
    pub max_elements: usize,

    /// Normalize vectors on insert.
    pub normalize: bool,

    /// Graph: maximum connections per element per layer.
    pub m: usize,

    /// Graph: candidate list size during construction.
    pub ef_construction: usize,

    /// Graph: candidate list size during search.
    pub ef_search: usize,

    /// Graph: maximum number of layers.
    pub max_layers: usize,

    /// Clustered: number of clusters.
    pub num_clusters: usize,

    /// Clustered: target vectors per cluster.
    pub cluster_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            kind: IndexKind::Flat,
            metric: DistanceMetric::Cosine,
            max_elements: 0,
            normalize: false,
            m: 16,
            ef_construction: 200,
            ef_search: 100,
            max_layers: 16,
            num_clusters: 256,
            cluster_size: 1000,
        }
    }
}

impl IndexConfig {
    /// Create a flat-index configuration with the given metric.
    pub fn flat(metric: DistanceMetric) -> Self {
        Self {
            kind: IndexKind::Flat,
            metric,
            ..Self::default()
        }
    }

    /// Set the distance metric.
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Set the maximum number of vectors.
    pub fn with_max_elements(mut self, max: usize) -> Self {
        self.max_elements = max;
        self
    }

    /// Enable or disable normalize-on-insert.
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }
}
