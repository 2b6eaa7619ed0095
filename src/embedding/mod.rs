//! Embedding service layer.
//!
//! Turns text into vectors through pluggable providers, with a cache, a
//! per-provider rate limiter, a retry manager, and a fallback chain
//! composed by [`service::EmbeddingService`].
//!
//! # Module Structure
//!
//! - [`provider`] - The [`provider::EmbeddingProvider`] contract and capability model
//! - [`openai`] - OpenAI-style HTTP backend
//! - [`local`] - Deterministic in-process backend
//! - [`cache`] - Fingerprint-keyed embedding cache
//! - [`rate_limit`] - Per-provider token buckets
//! - [`retry`] - Bounded exponential backoff
//! - [`service`] - The orchestrating service

pub mod cache;
pub mod local;
pub mod openai;
pub mod provider;
pub mod rate_limit;
pub mod retry;
pub mod service;

pub use cache::{CacheConfig, CacheStats, EmbeddingCache, MemoryEmbeddingCache, NoopCache};
pub use local::{LocalProvider, LocalProviderConfig};
pub use openai::{OpenAiProvider, OpenAiProviderConfig};
pub use provider::{EmbeddingProvider, ModelInfo, ProviderCapabilities};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use retry::{RetryConfig, RetryManager};
pub use service::{EmbeddingService, EmbeddingServiceConfig, ProviderHealth};
