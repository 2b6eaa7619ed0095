//! Embedding cache.
//!
//! Caches embedding matrices keyed by a request fingerprint so repeated
//! requests for identical content skip the provider entirely.
//!
//! # Cache Key Strategy
//!
//! Keys are SHA-256 hashes over `provider × model × ordered texts`, unless
//! the caller supplies an explicit `cache_key`; that key then carries all
//! the identity the caller cares about.
//!
//! Entries are bounded by count **and** by memory; when either bound would
//! be exceeded on insert, the entry with the earliest expiry is evicted.
//! A background sweeper purges expired entries at a fixed period.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::types::Result;

/// Period between background sweeps of expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// An embedding matrix: one row per input text.
pub type EmbeddingMatrix = Vec<Vec<f64>>;

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Current size in bytes (approximate).
    pub size_bytes: u64,
    /// Number of entries in cache.
    pub entry_count: usize,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Configuration for the embedding cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether the cache is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Cache backend; only `"memory"` is recognized.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,

    /// TTL applied to entries without an explicit override.
    #[serde(default = "default_ttl")]
    pub ttl: Duration,

    /// Maximum number of entries.
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Maximum memory in bytes.
    #[serde(default = "default_max_memory")]
    pub max_memory: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_kind() -> String {
    "memory".to_string()
}

fn default_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_size() -> usize {
    10_000
}

fn default_max_memory() -> u64 {
    256 * 1024 * 1024 // 256 MB
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            kind: default_kind(),
            ttl: default_ttl(),
            max_size: default_max_size(),
            max_memory: default_max_memory(),
        }
    }
}

/// Compute the fingerprint for a provider/model/texts triple.
pub fn fingerprint<S: AsRef<str>>(provider: &str, model: &str, texts: &[S]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update(b"|");
    hasher.update(model.as_bytes());
    for text in texts {
        hasher.update(b"|");
        hasher.update(text.as_ref().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Cache Trait
// ============================================================================

/// Trait for embedding cache implementations.
pub trait EmbeddingCache: Send + Sync {
    /// Get a matrix from the cache. Expired entries count as misses.
    fn get(&self, key: &str) -> Option<EmbeddingMatrix>;

    /// Store a matrix with an optional TTL override.
    fn set(&self, key: &str, matrix: EmbeddingMatrix, ttl: Option<Duration>) -> Result<()>;

    /// Remove an entry from the cache.
    fn invalidate(&self, key: &str) -> Result<()>;

    /// Clear all entries from the cache.
    fn clear(&self) -> Result<()>;

    /// Get cache statistics.
    fn stats(&self) -> CacheStats;

    /// Check if the cache is enabled.
    fn is_enabled(&self) -> bool;
}

// ============================================================================
// Cache Entry
// ============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    matrix: EmbeddingMatrix,
    expires_at: Instant,
    size_bytes: usize,
}

impl CacheEntry {
    fn new(matrix: EmbeddingMatrix, ttl: Duration) -> Self {
        let size_bytes: usize = matrix
            .iter()
            .map(|row| row.len() * std::mem::size_of::<f64>())
            .sum();
        Self {
            matrix,
            expires_at: Instant::now() + ttl,
            size_bytes,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

// ============================================================================
// Memory Cache
// ============================================================================

/// In-memory TTL cache for embedding matrices.
///
/// Bounded by entry count and memory; eviction removes the entry with the
/// earliest expiry. Thread-safe via `parking_lot::RwLock`.
pub struct MemoryEmbeddingCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    config: CacheConfig,
    current_size: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryEmbeddingCache {
    /// Create a new memory cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            current_size: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a cache with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Remove expired entries.
    pub fn purge_expired(&self) {
        let mut entries = self.entries.write();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(entry) = entries.remove(&key) {
                self.current_size
                    .fetch_sub(entry.size_bytes as u64, Ordering::Relaxed);
            }
        }
    }

    /// Evict earliest-expiry entries until both bounds have room for
    /// `needed_bytes` and one more entry. Caller holds the write lock.
    fn evict_for(&self, entries: &mut HashMap<String, CacheEntry>, needed_bytes: usize) {
        loop {
            let over_count = entries.len() >= self.config.max_size;
            let over_memory = self.current_size.load(Ordering::Relaxed) + needed_bytes as u64
                > self.config.max_memory;
            if (!over_count && !over_memory) || entries.is_empty() {
                break;
            }

            let victim = entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(key, _)| key.clone());

            match victim {
                Some(key) => {
                    if let Some(entry) = entries.remove(&key) {
                        self.current_size
                            .fetch_sub(entry.size_bytes as u64, Ordering::Relaxed);
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => break,
            }
        }
    }

    /// Current cache size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl EmbeddingCache for MemoryEmbeddingCache {
    fn get(&self, key: &str) -> Option<EmbeddingMatrix> {
        if !self.config.enabled {
            return None;
        }

        // Fast path under the read lock.
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.matrix.clone());
                }
                Some(_) => {} // expired; fall through to remove
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired entry: remove under the write lock.
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(key) {
            if entry.is_expired() {
                if let Some(removed) = entries.remove(key) {
                    self.current_size
                        .fetch_sub(removed.size_bytes as u64, Ordering::Relaxed);
                }
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn set(&self, key: &str, matrix: EmbeddingMatrix, ttl: Option<Duration>) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let entry = CacheEntry::new(matrix, ttl.unwrap_or(self.config.ttl));
        let entry_size = entry.size_bytes;

        let mut entries = self.entries.write();

        if let Some(old) = entries.remove(key) {
            self.current_size
                .fetch_sub(old.size_bytes as u64, Ordering::Relaxed);
        }

        self.evict_for(&mut entries, entry_size);

        self.current_size
            .fetch_add(entry_size as u64, Ordering::Relaxed);
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    fn invalidate(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.remove(key) {
            self.current_size
                .fetch_sub(entry.size_bytes as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        self.current_size.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size_bytes: self.current_size.load(Ordering::Relaxed),
            entry_count: self.entries.read().len(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// Spawn the background sweeper for a memory cache.
///
/// Holds only a weak reference; the task ends when the cache is dropped or
/// the handle is aborted.
pub fn spawn_sweeper(
    cache: &Arc<MemoryEmbeddingCache>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    let weak: Weak<MemoryEmbeddingCache> = Arc::downgrade(cache);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        interval.tick().await;
        loop {
            interval.tick().await;
            match weak.upgrade() {
                Some(cache) => {
                    cache.purge_expired();
                    debug!(entries = cache.len(), "Swept embedding cache");
                }
                None => break,
            }
        }
    })
}

// ============================================================================
// No-Op Cache
// ============================================================================

/// A cache that stores nothing, for the disabled case.
#[derive(Debug, Default)]
pub struct NoopCache;

impl NoopCache {
    /// Create a new no-op cache.
    pub fn new() -> Self {
        Self
    }
}

impl EmbeddingCache for NoopCache {
    fn get(&self, _key: &str) -> Option<EmbeddingMatrix> {
        None
    }

    fn set(&self, _key: &str, _matrix: EmbeddingMatrix, _ttl: Option<Duration>) -> Result<()> {
        Ok(())
    }

    fn invalidate(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: usize, cols: usize) -> EmbeddingMatrix {
        (0..rows).map(|r| vec![r as f64; cols]).collect()
    }

    #[test]
    fn test_fingerprint_stability() {
        let a = fingerprint("openai", "m", &["hello", "world"]);
        let b = fingerprint("openai", "m", &["hello", "world"]);
        assert_eq!(a, b);

        assert_ne!(a, fingerprint("local", "m", &["hello", "world"]));
        assert_ne!(a, fingerprint("openai", "other", &["hello", "world"]));
        assert_ne!(a, fingerprint("openai", "m", &["world", "hello"]));
    }

    #[test]
    fn test_set_and_get() {
        let cache = MemoryEmbeddingCache::with_defaults();
        let m = matrix(2, 3);

        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().misses, 1);

        cache.set("k", m.clone(), None).unwrap();
        assert_eq!(cache.get("k"), Some(m));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_hit_returns_bit_equal_matrix() {
        let cache = MemoryEmbeddingCache::with_defaults();
        let m = vec![vec![0.1, 0.2, 0.30000000000000004]];
        cache.set("k", m.clone(), None).unwrap();

        let hit = cache.get("k").unwrap();
        assert_eq!(hit.len(), m.len());
        for (a, b) in hit[0].iter().zip(m[0].iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_expired_entry_is_miss_and_removed() {
        let cache = MemoryEmbeddingCache::with_defaults();
        cache
            .set("k", matrix(1, 4), Some(Duration::from_nanos(1)))
            .unwrap();

        std::thread::sleep(Duration::from_millis(2));

        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_entry_count_bound() {
        let cache = MemoryEmbeddingCache::new(CacheConfig {
            max_size: 2,
            ..Default::default()
        });

        // "a" expires first and is the eviction victim.
        cache.set("a", matrix(1, 2), Some(Duration::from_secs(10))).unwrap();
        cache.set("b", matrix(1, 2), Some(Duration::from_secs(60))).unwrap();
        cache.set("c", matrix(1, 2), Some(Duration::from_secs(30))).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.stats().evictions > 0);
    }

    #[test]
    fn test_memory_bound() {
        // Each 1x4 matrix is 32 bytes; cap at 64.
        let cache = MemoryEmbeddingCache::new(CacheConfig {
            max_memory: 64,
            ..Default::default()
        });

        cache.set("a", matrix(1, 4), Some(Duration::from_secs(10))).unwrap();
        cache.set("b", matrix(1, 4), Some(Duration::from_secs(60))).unwrap();
        cache.set("c", matrix(1, 4), Some(Duration::from_secs(30))).unwrap();

        assert!(cache.size_bytes() <= 64);
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = MemoryEmbeddingCache::with_defaults();
        cache.set("a", matrix(1, 2), None).unwrap();
        cache.set("b", matrix(1, 2), None).unwrap();

        cache.invalidate("a").unwrap();
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());

        cache.clear().unwrap();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_update_existing_key() {
        let cache = MemoryEmbeddingCache::with_defaults();
        cache.set("k", matrix(1, 2), None).unwrap();
        cache.set("k", matrix(2, 4), None).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k").unwrap().len(), 2);
    }

    #[test]
    fn test_disabled_cache() {
        let cache = MemoryEmbeddingCache::new(CacheConfig {
            enabled: false,
            ..Default::default()
        });

        cache.set("k", matrix(1, 2), None).unwrap();
        assert!(cache.get("k").is_none());
        assert!(!cache.is_enabled());
    }

    #[test]
    fn test_noop_cache() {
        let cache = NoopCache::new();
        cache.set("k", matrix(1, 2), None).unwrap();
        assert!(cache.get("k").is_none());
        assert!(!cache.is_enabled());
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 75,
            misses: 25,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 75.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sweeper_purges_expired() {
        let cache = Arc::new(MemoryEmbeddingCache::with_defaults());
        cache
            .set("k", matrix(1, 2), Some(Duration::from_millis(1)))
            .unwrap();

        let handle = spawn_sweeper(&cache, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cache.len(), 0);
        handle.abort();
    }
}
