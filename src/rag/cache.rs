//! RAG query cache.
//!
//! Caches whole responses keyed by a SHA-256 fingerprint of the
//! JSON-serialized query, so two byte-identical queries share one entry.
//! Bounded by entry count; eviction removes the entry with the earliest
//! expiry.

use crate::types::{RagQuery, RagResponse};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Statistics for the query cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryCacheStats {
    /// Lookup hits.
    pub hits: u64,
    /// Lookup misses.
    pub misses: u64,
    /// Entries currently cached.
    pub entry_count: usize,
    /// Evictions due to capacity.
    pub evictions: u64,
}

/// Compute the cache key for a query.
///
/// SHA-256 over the JSON serialization; serialization failures are
/// impossible for [`RagQuery`]'s field types, but fall back to the raw
/// text to stay total.
pub fn query_key(query: &RagQuery) -> String {
    let serialized = serde_json::to_vec(query).unwrap_or_else(|_| query.text.clone().into_bytes());
    let mut hasher = Sha256::new();
    hasher.update(&serialized);
    format!("{:x}", hasher.finalize())
}

struct CacheEntry {
    response: RagResponse,
    expires_at: Instant,
}

/// Bounded TTL cache for RAG responses.
pub struct QueryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl QueryCache {
    /// Create a cache with the given TTL and entry bound.
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_size: max_size.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a response. Expired entries count as misses and are removed.
    pub fn get(&self, key: &str) -> Option<RagResponse> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.response.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        let mut entries = self.entries.write();
        if entries
            .get(key)
            .is_some_and(|entry| entry.expires_at <= Instant::now())
        {
            entries.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a response under the given key.
    pub fn set(&self, key: &str, response: RagResponse) {
        let mut entries = self.entries.write();

        entries.remove(key);
        while entries.len() >= self.max_size {
            let victim = entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(key, _)| key.clone());
            match victim {
                Some(key) => {
                    entries.remove(&key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                response,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Remove one entry.
    pub fn invalidate(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of cached responses.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of cache statistics.
    pub fn stats(&self) -> QueryCacheStats {
        QueryCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.read().len(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
