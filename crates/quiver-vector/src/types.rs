//! Common types for quiver-vector.

use crate::distance;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Floating tolerance for magnitude checks on normalized vectors.
pub const NORMALIZED_TOLERANCE: f64 = 1e-9;

/// Unique identifier for a vector in a collection.
pub type VectorId = String;

/// Metadata associated with a vector.
///
/// Arbitrary key-value pairs that can be stored alongside vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    /// Key-value pairs of metadata.
    pub data: HashMap<String, MetadataValue>,
}

impl VectorMetadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Create metadata from a list of key-value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetadataValue>,
    {
        Self {
            data: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Insert a key-value pair.
    pub fn insert<K: Into<String>, V: Into<MetadataValue>>(&mut self, key: K, value: V) {
        self.data.insert(key.into(), value.into());
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.data.get(key)
    }

    /// Get a string value by key.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.data.get(key)? {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get an integer value by key.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.data.get(key)? {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get a float value by key.
    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.data.get(key)? {
            MetadataValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get a boolean value by key.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.data.get(key)? {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Check whether every pair in `filter` is present with an equal value.
    pub fn matches(&self, filter: &HashMap<String, MetadataValue>) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.data.get(k).is_some_and(|own| own == v))
    }

    /// Check if metadata is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of metadata entries.
    pub fn len(&self) -> usize {
        self.data.len()
    }
}

/// A metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// String value.
    String(String),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
    /// List of values.
    List(Vec<MetadataValue>),
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Int(i)
    }
}

impl From<i32> for MetadataValue {
    fn from(i: i32) -> Self {
        MetadataValue::Int(i as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(f: f64) -> Self {
        MetadataValue::Float(f)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

impl<T: Into<MetadataValue>> From<Vec<T>> for MetadataValue {
    fn from(v: Vec<T>) -> Self {
        MetadataValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<&serde_json::Value> for MetadataValue {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Bool(b) => MetadataValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    MetadataValue::Int(i)
                } else {
                    MetadataValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => MetadataValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                MetadataValue::List(items.iter().map(MetadataValue::from).collect())
            }
            // Null and nested objects carry no typed representation; keep
            // their JSON text so nothing is silently dropped.
            other => MetadataValue::String(other.to_string()),
        }
    }
}

/// An identified carrier of an embedding within a collection.
///
/// A `Vector` owns its embedding values, caches its magnitude, and tracks
/// creation/update timestamps. Timestamps never move backwards across
/// updates to the same vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    /// Stable unique identifier.
    pub id: VectorId,
    /// Name of the owning collection.
    pub collection: String,
    /// The embedding values.
    pub embedding: Vec<f64>,
    /// Optional source text this embedding was derived from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: VectorMetadata,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Cached magnitude `sqrt(Σ vᵢ²)`.
    pub magnitude: f64,
    /// Whether the embedding has been scaled to unit magnitude.
    pub normalized: bool,
}

impl Vector {
    /// Create a new vector with a fresh identifier.
    ///
    /// Computes the magnitude and stamps both timestamps with the current
    /// time.
    pub fn new(
        collection: impl Into<String>,
        embedding: Vec<f64>,
        text: Option<String>,
        metadata: VectorMetadata,
    ) -> Self {
        let now = Utc::now();
        let magnitude = compute_magnitude(&embedding);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            collection: collection.into(),
            embedding,
            text,
            metadata,
            created_at: now,
            updated_at: now,
            magnitude,
            normalized: false,
        }
    }

    /// Create a new vector with a caller-supplied identifier.
    pub fn with_id(
        id: impl Into<VectorId>,
        collection: impl Into<String>,
        embedding: Vec<f64>,
        text: Option<String>,
        metadata: VectorMetadata,
    ) -> Self {
        let mut v = Self::new(collection, embedding, text, metadata);
        v.id = id.into();
        v
    }

    /// Number of dimensions of this vector.
    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }

    /// Scale the embedding to unit magnitude.
    ///
    /// Idempotent; a zero-magnitude vector is left untouched. Bumps the
    /// update timestamp when a rescale actually happens.
    pub fn normalize(&mut self) {
        if self.normalized || self.magnitude == 0.0 {
            return;
        }
        for value in &mut self.embedding {
            *value /= self.magnitude;
        }
        self.magnitude = 1.0;
        self.normalized = true;
        self.touch();
    }

    /// Cosine similarity against another vector.
    ///
    /// When both vectors are already normalized the magnitudes are unit and
    /// the bare dot product is returned.
    pub fn similarity(&self, other: &Vector) -> Result<f64> {
        if self.dimension() != other.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                actual: other.dimension(),
            });
        }

        let dot = distance::dot_product(&self.embedding, &other.embedding);
        if self.normalized && other.normalized {
            return Ok(dot);
        }

        let denom = self.magnitude * other.magnitude;
        if denom == 0.0 {
            return Ok(0.0);
        }
        Ok(dot / denom)
    }

    /// Euclidean distance against another vector.
    pub fn distance(&self, other: &Vector) -> Result<f64> {
        if self.dimension() != other.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                actual: other.dimension(),
            });
        }
        Ok(distance::euclidean_distance(&self.embedding, &other.embedding))
    }

    /// Replace the embedding, recomputing magnitude and clearing the
    /// normalized flag.
    pub fn set_embedding(&mut self, embedding: Vec<f64>) {
        self.magnitude = compute_magnitude(&embedding);
        self.embedding = embedding;
        self.normalized = false;
        self.touch();
    }

    /// Bump the update timestamp, never moving it backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

/// Compute the magnitude `sqrt(Σ vᵢ²)` of an embedding.
pub fn compute_magnitude(embedding: &[f64]) -> f64 {
    embedding.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Result of a vector search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The matched vector.
    pub vector: Vector,
    /// Similarity score (higher = more similar).
    pub score: f64,
    /// Distance under the collection metric (lower = closer).
    pub distance: f64,
    /// 1-based position within the result list.
    pub rank: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_basic() {
        let mut meta = VectorMetadata::new();
        meta.insert("title", "Test Document");
        meta.insert("score", 0.95f64);
        meta.insert("count", 42i64);
        meta.insert("active", true);

        assert_eq!(meta.get_string("title"), Some("Test Document"));
        assert_eq!(meta.get_float("score"), Some(0.95));
        assert_eq!(meta.get_int("count"), Some(42));
        assert_eq!(meta.get_bool("active"), Some(true));
    }

    #[test]
    fn test_metadata_matches() {
        let meta = VectorMetadata::from_pairs([("domain", "culinary"), ("lang", "en")]);

        let mut filter = HashMap::new();
        filter.insert("domain".to_string(), MetadataValue::from("culinary"));
        assert!(meta.matches(&filter));

        filter.insert("lang".to_string(), MetadataValue::from("de"));
        assert!(!meta.matches(&filter));
    }

    #[test]
    fn test_metadata_from_json() {
        let value = serde_json::json!({"tags": ["a", "b"], "year": 2024, "ratio": 0.5});
        let meta = VectorMetadata {
            data: value
                .as_object()
                .unwrap()
                .iter()
                .map(|(k, v)| (k.clone(), MetadataValue::from(v)))
                .collect(),
        };

        assert_eq!(meta.get_int("year"), Some(2024));
        assert_eq!(meta.get_float("ratio"), Some(0.5));
        assert!(matches!(meta.get("tags"), Some(MetadataValue::List(_))));
    }

    #[test]
    fn test_new_vector_magnitude() {
        let v = Vector::new("docs", vec![3.0, 4.0], None, VectorMetadata::new());
        assert_eq!(v.dimension(), 2);
        assert!((v.magnitude - 5.0).abs() < NORMALIZED_TOLERANCE);
        assert!(!v.normalized);
        assert_eq!(v.created_at, v.updated_at);
    }

    #[test]
    fn test_normalize() {
        let mut v = Vector::new("docs", vec![3.0, 4.0], None, VectorMetadata::new());
        v.normalize();

        assert_eq!(v.embedding, vec![0.6, 0.8]);
        assert!((v.magnitude - 1.0).abs() < NORMALIZED_TOLERANCE);
        assert!(v.normalized);
    }

    #[test]
    fn test_normalize_idempotent() {
        let mut v = Vector::new("docs", vec![3.0, 4.0], None, VectorMetadata::new());
        v.normalize();
        let snapshot = v.clone();

        v.normalize();
        assert_eq!(v, snapshot);
    }

    #[test]
    fn test_normalize_zero_vector() {
        let mut v = Vector::new("docs", vec![0.0, 0.0], None, VectorMetadata::new());
        v.normalize();

        assert_eq!(v.embedding, vec![0.0, 0.0]);
        assert_eq!(v.magnitude, 0.0);
        assert!(!v.normalized);
    }

    #[test]
    fn test_similarity_dimension_mismatch() {
        let a = Vector::new("docs", vec![1.0, 0.0], None, VectorMetadata::new());
        let b = Vector::new("docs", vec![1.0, 0.0, 0.0], None, VectorMetadata::new());
        assert!(matches!(
            a.similarity(&b),
            Err(Error::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_similarity_symmetric() {
        let a = Vector::new("docs", vec![1.0, 2.0, 3.0], None, VectorMetadata::new());
        let b = Vector::new("docs", vec![-2.0, 0.5, 1.0], None, VectorMetadata::new());

        let ab = a.similarity(&b).unwrap();
        let ba = b.similarity(&a).unwrap();
        assert!((ab - ba).abs() < 1e-12);
    }

    #[test]
    fn test_similarity_normalized_uses_dot() {
        let mut a = Vector::new("docs", vec![1.0, 1.0], None, VectorMetadata::new());
        let mut b = Vector::new("docs", vec![1.0, 0.0], None, VectorMetadata::new());
        let expected = a.similarity(&b).unwrap();

        a.normalize();
        b.normalize();
        let normalized = a.similarity(&b).unwrap();
        assert!((normalized - expected).abs() < 1e-9);
    }

    #[test]
    fn test_distance_euclidean() {
        let a = Vector::new("docs", vec![0.0, 0.0], None, VectorMetadata::new());
        let b = Vector::new("docs", vec![3.0, 4.0], None, VectorMetadata::new());
        assert!((a.distance(&b).unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_set_embedding_resets_normalized() {
        let mut v = Vector::new("docs", vec![3.0, 4.0], None, VectorMetadata::new());
        v.normalize();
        assert!(v.normalized);

        v.set_embedding(vec![1.0, 1.0]);
        assert!(!v.normalized);
        assert!((v.magnitude - 2.0f64.sqrt()).abs() < 1e-9);
    }
}
