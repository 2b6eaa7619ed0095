//! # Quiver
//!
//! An embedded vector database with a retrieval-augmented generation
//! pipeline on top: multi-provider embeddings, batch execution, query
//! expansion, and reranking.
//!
//! ## Overview
//!
//! Quiver is a library core. A serving shell (HTTP, CLI, anything) calls
//! into [`api::QuiverApi`]; everything below it is usable directly:
//!
//! - [`quiver_vector`] - the index substrate: collections of identified
//!   `f64` vectors with exact similarity search
//! - [`embedding`] - pluggable text-to-vector providers behind a cache,
//!   rate limiter, retry manager, and fallback chain
//! - [`batch`] - worker-pool fan-out for embedding, vector, and RAG jobs
//! - [`rag`] - the staged query pipeline (process → expand → embed →
//!   search → rerank → respond)
//!
//! ## Quick Start
//!
//! ```rust
//! use quiver::batch::{BatchConfig, BatchProcessor};
//! use quiver::embedding::{EmbeddingService, EmbeddingServiceConfig, LocalProvider};
//! use quiver::rag::{RagConfig, RagEngine};
//! use quiver::api::QuiverApi;
//! use quiver_vector::VectorStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> quiver::Result<()> {
//! let service = EmbeddingService::new(EmbeddingServiceConfig::default())?;
//! service.register_provider(Arc::new(LocalProvider::with_defaults()))?;
//! let service = Arc::new(service);
//!
//! let store = VectorStore::new();
//! let engine = Arc::new(RagEngine::new(RagConfig::default(), service.clone(), store.clone()));
//! let batch = Arc::new(BatchProcessor::new(BatchConfig::default(), service, store.clone()));
//!
//! let api = QuiverApi::new(store, engine, batch);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! All blocking waits are cancellation-aware: every public entry point
//! takes a `CancellationToken`, per-call timeouts derive child deadlines,
//! and batch workers drain without executing once cancelled. Shared state
//! lives behind reader-preferring locks owned by explicit component
//! instances; there are no globals beyond the `tracing` subscriber the
//! shell installs.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

/// Serving surface: wire-stable request types and the operations facade.
pub mod api;
/// Worker-pool batch execution for embedding, vector, and RAG jobs.
pub mod batch;
/// Embedding providers, cache, rate limiting, retries, and the service.
pub mod embedding;
/// The staged RAG query pipeline.
pub mod rag;
/// Core types (requests, responses, errors).
pub mod types;

// Re-export commonly used types
pub use api::QuiverApi;
pub use batch::{BatchConfig, BatchProcessor};
pub use embedding::{
    EmbeddingProvider, EmbeddingService, EmbeddingServiceConfig, LocalProvider, OpenAiProvider,
};
pub use rag::{RagConfig, RagEngine};
pub use types::{
    EmbeddingRequest, EmbeddingResponse, QueryResult, QuiverError, RagQuery, RagResponse, Result,
};

// Re-export the index substrate crate
pub use quiver_vector;
