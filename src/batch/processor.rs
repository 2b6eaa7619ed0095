//! Worker-pool batch orchestrator.
//!
//! Fans items across bounded concurrency in contiguous windows. Output row
//! `i` always corresponds to input item `i` regardless of which window
//! processed it; window failures degrade to per-item errors instead of
//! aborting the batch.

use crate::batch::{
    BatchConfig, BatchEmbeddingRequest, BatchEmbeddingResponse, BatchError, BatchProgress,
    BatchRagRequest, BatchStats, BatchVectorRequest, BatchVectorResponse, ProgressCallback,
    VectorOp, CODE_CANCELLED, CODE_EMBEDDING_FAILED, CODE_VECTOR_OP_FAILED,
};
use crate::embedding::EmbeddingService;
use crate::rag::RagEngine;
use crate::types::{EmbeddingRequest, QuiverError, RagQuery, RagResponse, Result};
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use quiver_vector::{distance, VectorStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Requests beyond this size get their windows shrunk for better parallel
/// coverage.
const LARGE_REQUEST_THRESHOLD: usize = 10_000;

/// Interval between progress snapshots.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Poll interval while draining active batches on close.
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A contiguous window of input items.
#[derive(Debug, Clone, Copy)]
struct Window {
    start: usize,
    end: usize,
}

/// Estimated total wall time for a windowed batch.
fn estimate_processing_time(windows: usize, workers: usize, per_call: Duration) -> Duration {
    let rounds = windows.div_ceil(workers.max(1));
    per_call * rounds as u32
}

/// Progress estimate at `elapsed` into a batch expected to take `estimate`.
fn progress_snapshot(total: usize, elapsed: Duration, estimate: Duration) -> usize {
    if estimate.is_zero() {
        return total;
    }
    let fraction = elapsed.as_secs_f64() / estimate.as_secs_f64();
    ((total as f64 * fraction) as usize).min(total)
}

fn partition(total: usize, window_size: usize) -> Vec<Window> {
    let size = window_size.max(1);
    (0..total.div_ceil(size))
        .map(|i| Window {
            start: i * size,
            end: ((i + 1) * size).min(total),
        })
        .collect()
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Worker-pool fan-out orchestrator for embedding, vector, and RAG batches.
pub struct BatchProcessor {
    config: BatchConfig,
    embedding: Arc<EmbeddingService>,
    store: VectorStore,
    rag: RwLock<Option<Arc<RagEngine>>>,
    progress: RwLock<Option<ProgressCallback>>,
    stats: Mutex<BatchStats>,
    active: Arc<AtomicUsize>,
}

impl BatchProcessor {
    /// Create a batch processor over an embedding service and vector store.
    pub fn new(
        config: BatchConfig,
        embedding: Arc<EmbeddingService>,
        store: VectorStore,
    ) -> Self {
        Self {
            config,
            embedding,
            store,
            rag: RwLock::new(None),
            progress: RwLock::new(None),
            stats: Mutex::new(BatchStats::default()),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Attach the RAG engine used by [`BatchProcessor::process_rag`].
    pub fn set_rag_engine(&self, engine: Arc<RagEngine>) {
        *self.rag.write() = Some(engine);
    }

    /// Register a progress callback, replacing any existing one.
    pub fn set_progress_callback(&self, callback: ProgressCallback) {
        *self.progress.write() = Some(callback);
    }

    /// The processor configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Snapshot of aggregate batch statistics.
    pub fn stats(&self) -> BatchStats {
        self.stats.lock().clone()
    }

    /// Number of batches currently in flight.
    pub fn active_batches(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn record_batch(&self, items: usize, errors: usize, elapsed: Duration) {
        let mut stats = self.stats.lock();
        stats.total_batches += 1;
        stats.total_items += items as u64;
        stats.total_errors += errors as u64;
        stats.total_duration += elapsed;
    }

    fn worker_count(&self, requested: Option<usize>, windows: usize) -> usize {
        requested
            .unwrap_or(self.config.max_concurrent_batches)
            .min(self.config.max_concurrent_batches)
            .min(windows)
            .max(1)
    }

    /// Effective window size for an embedding request.
    fn embedding_window_size(&self, request: &BatchEmbeddingRequest, provider: &str) -> usize {
        let mut size = request
            .batch_size
            .unwrap_or(self.config.default_batch_size)
            .max(1);

        if let Some(provider) = self.embedding.get_provider(provider) {
            size = size.min(provider.capabilities().optimal_batch_size.max(1));
        }
        if let Some(&override_size) = self.config.provider_batch_sizes.get(provider) {
            size = size.min(override_size.max(1));
        }

        // Very large requests divide their windows across the pool for
        // better parallel coverage.
        if request.texts.len() > LARGE_REQUEST_THRESHOLD {
            size = (size / self.config.max_concurrent_batches.max(1)).max(1);
        }
        size
    }

    fn spawn_progress_ticker(
        &self,
        total: usize,
        estimate: Duration,
        started: Instant,
        done: CancellationToken,
    ) {
        let Some(callback) = self.progress.read().clone() else {
            return;
        };

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = done.cancelled() => break,
                    _ = interval.tick() => {
                        let elapsed = started.elapsed();
                        callback(BatchProgress {
                            processed: progress_snapshot(total, elapsed, estimate),
                            total,
                            elapsed,
                        });
                    }
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Embedding batches
    // ------------------------------------------------------------------

    /// Fan a batch of texts across the embedding service.
    ///
    /// Window failures record one [`BatchError`] per text in the window and
    /// leave those rows empty; remaining windows proceed. Cancellation
    /// aborts the batch with `Cancelled`.
    pub async fn process_embeddings(
        &self,
        cancel: &CancellationToken,
        request: &BatchEmbeddingRequest,
    ) -> Result<BatchEmbeddingResponse> {
        if request.texts.is_empty() {
            return Err(QuiverError::EmptyInput);
        }
        if request.texts.len() > self.config.max_batch_size {
            return Err(QuiverError::InputTooLarge {
                size: request.texts.len(),
                max: self.config.max_batch_size,
            });
        }
        if let Some(requested) = request.max_concurrent {
            if requested > self.config.max_concurrent_batches {
                return Err(QuiverError::Configuration(format!(
                    "max_concurrent {} exceeds limit {}",
                    requested, self.config.max_concurrent_batches
                )));
            }
        }
        if cancel.is_cancelled() {
            return Err(QuiverError::Cancelled);
        }

        let _guard = ActiveGuard::new(&self.active);
        let started = Instant::now();
        let total = request.texts.len();

        let provider_tag = request
            .provider
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.embedding.config().default_provider.clone());
        let window_size = self.embedding_window_size(request, &provider_tag);
        let windows = partition(total, window_size);
        let workers = self.worker_count(request.max_concurrent, windows.len());

        let per_call = self
            .embedding
            .get_provider(&provider_tag)
            .map(|p| p.capabilities().estimated_latency)
            .unwrap_or(Duration::from_millis(200));
        let estimate = estimate_processing_time(windows.len(), workers, per_call);

        let done = CancellationToken::new();
        self.spawn_progress_ticker(total, estimate, started, done.clone());

        debug!(
            total,
            windows = windows.len(),
            workers,
            provider = %provider_tag,
            "Starting embedding batch"
        );

        struct WindowOutcome {
            window: Window,
            rows: Option<Vec<Vec<f64>>>,
            tokens: usize,
            cache_hit: bool,
            error: Option<QuiverError>,
        }

        let texts = Arc::new(request.texts.clone());
        let outcomes: Vec<WindowOutcome> = stream::iter(windows.iter().copied())
            .map(|window| {
                let texts = texts.clone();
                let provider_tag = provider_tag.clone();
                let model = request.model.clone();
                let timeout = request.timeout.or(Some(self.config.default_timeout));
                let embedding = self.embedding.clone();
                let cancel = cancel.clone();
                async move {
                    // Drained without executing once the batch is cancelled.
                    if cancel.is_cancelled() {
                        return WindowOutcome {
                            window,
                            rows: None,
                            tokens: 0,
                            cache_hit: false,
                            error: Some(QuiverError::Cancelled),
                        };
                    }

                    let sub_request = EmbeddingRequest {
                        texts: texts[window.start..window.end].to_vec(),
                        model,
                        provider: Some(provider_tag),
                        timeout,
                        ..Default::default()
                    };
                    match embedding.generate_embeddings(&cancel, &sub_request).await {
                        Ok(response) => WindowOutcome {
                            window,
                            rows: Some(response.embeddings),
                            tokens: response.usage.total_tokens,
                            cache_hit: response.cache_hit,
                            error: None,
                        },
                        Err(e) => WindowOutcome {
                            window,
                            rows: None,
                            tokens: 0,
                            cache_hit: false,
                            error: Some(e),
                        },
                    }
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        done.cancel();

        if cancel.is_cancelled() {
            return Err(QuiverError::Cancelled);
        }

        let mut response = BatchEmbeddingResponse {
            embeddings: vec![Vec::new(); total],
            ..Default::default()
        };

        for outcome in outcomes {
            match (outcome.rows, outcome.error) {
                (Some(rows), _) => {
                    for (offset, row) in rows.into_iter().enumerate() {
                        response.embeddings[outcome.window.start + offset] = row;
                    }
                    response.total_tokens += outcome.tokens;
                    if outcome.cache_hit {
                        response.cache_hits += 1;
                    }
                    response.batches_processed += 1;
                }
                (None, error) => {
                    let (code, message) = match error {
                        Some(QuiverError::Cancelled) => {
                            (CODE_CANCELLED, "batch cancelled".to_string())
                        }
                        Some(e) => (CODE_EMBEDDING_FAILED, e.to_string()),
                        None => (CODE_EMBEDDING_FAILED, "unknown failure".to_string()),
                    };
                    for index in outcome.window.start..outcome.window.end {
                        response.errors.push(BatchError {
                            index,
                            code: code.to_string(),
                            message: message.clone(),
                        });
                    }
                }
            }
        }
        response.errors.sort_by_key(|e| e.index);
        response.processing_time = started.elapsed();

        self.record_batch(total, response.errors.len(), response.processing_time);
        Ok(response)
    }

    // ------------------------------------------------------------------
    // Vector-op batches
    // ------------------------------------------------------------------

    /// Execute a batch vector operation against the store.
    pub async fn process_vectors(
        &self,
        cancel: &CancellationToken,
        request: &BatchVectorRequest,
    ) -> Result<BatchVectorResponse> {
        match request.operation {
            VectorOp::Search | VectorOp::Similarity | VectorOp::Distance
                if request.query_vector.is_none() =>
            {
                return Err(QuiverError::Configuration(format!(
                    "query_vector is required for {:?}",
                    request.operation
                )));
            }
            _ => {}
        }

        let item_count = match request.operation {
            VectorOp::Delete => request.ids.len(),
            VectorOp::Search => 1,
            _ => request.vectors.len(),
        };
        if item_count == 0 {
            return Err(QuiverError::EmptyInput);
        }
        if item_count > self.config.max_batch_size {
            return Err(QuiverError::InputTooLarge {
                size: item_count,
                max: self.config.max_batch_size,
            });
        }
        if cancel.is_cancelled() {
            return Err(QuiverError::Cancelled);
        }

        let _guard = ActiveGuard::new(&self.active);
        let started = Instant::now();
        let mut response = BatchVectorResponse::default();

        match request.operation {
            VectorOp::Search => {
                let query = request.query_vector.clone().unwrap_or_default();
                let k = request.k.unwrap_or(10);
                response.results = self.store.search(&request.collection, &query, k)?;
                response.processed = response.results.len();
            }
            VectorOp::Insert | VectorOp::Update => {
                self.run_vector_windows(cancel, request, &mut response, |store, v| {
                    store.insert(v.clone())
                })
                .await;
            }
            VectorOp::Delete => {
                let collection = request.collection.clone();
                for (index, id) in request.ids.iter().enumerate() {
                    if cancel.is_cancelled() {
                        response.errors.push(BatchError {
                            index,
                            code: CODE_CANCELLED.to_string(),
                            message: "batch cancelled".to_string(),
                        });
                        continue;
                    }
                    match self.store.delete(&collection, id) {
                        Ok(()) => response.processed += 1,
                        Err(e) => response.errors.push(BatchError {
                            index,
                            code: CODE_VECTOR_OP_FAILED.to_string(),
                            message: e.to_string(),
                        }),
                    }
                }
            }
            VectorOp::Normalize => {
                // Returns updated copies; inputs are not mutated in place.
                response.vectors = request
                    .vectors
                    .iter()
                    .map(|v| {
                        let mut copy = v.clone();
                        copy.normalize();
                        copy
                    })
                    .collect();
                response.processed = response.vectors.len();
            }
            VectorOp::Similarity | VectorOp::Distance => {
                let query = request.query_vector.clone().unwrap_or_default();
                let euclidean = request.operation == VectorOp::Distance;
                response.scores = vec![f64::NAN; request.vectors.len()];
                for (index, vector) in request.vectors.iter().enumerate() {
                    if vector.embedding.len() != query.len() {
                        response.errors.push(BatchError {
                            index,
                            code: CODE_VECTOR_OP_FAILED.to_string(),
                            message: QuiverError::DimensionMismatch {
                                expected: query.len(),
                                actual: vector.embedding.len(),
                            }
                            .to_string(),
                        });
                        continue;
                    }
                    response.scores[index] = if euclidean {
                        distance::euclidean_distance(&query, &vector.embedding)
                    } else {
                        distance::cosine_similarity(&query, &vector.embedding)
                    };
                    response.processed += 1;
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(QuiverError::Cancelled);
        }

        response.processing_time = started.elapsed();
        self.record_batch(item_count, response.errors.len(), response.processing_time);
        Ok(response)
    }

    /// Window fan-out over the request's vectors for store-mutating ops.
    async fn run_vector_windows<F>(
        &self,
        cancel: &CancellationToken,
        request: &BatchVectorRequest,
        response: &mut BatchVectorResponse,
        op: F,
    ) where
        F: Fn(&VectorStore, &quiver_vector::Vector) -> quiver_vector::Result<()> + Send + Sync,
    {
        let workers = if self.config.enable_parallel {
            let configured = if self.config.worker_count > 0 {
                self.config.worker_count
            } else {
                self.config.max_concurrent_batches
            };
            self.worker_count(request.max_concurrent.or(Some(configured)), usize::MAX)
        } else {
            1
        };

        let windows = partition(request.vectors.len(), self.config.default_batch_size);
        let op = &op;

        let outcomes: Vec<(usize, Vec<(usize, std::result::Result<(), String>)>)> =
            stream::iter(windows.into_iter())
                .map(|window| {
                    let store = self.store.clone();
                    let vectors = &request.vectors;
                    let cancel = cancel.clone();
                    async move {
                        let mut results = Vec::with_capacity(window.end - window.start);
                        for index in window.start..window.end {
                            if cancel.is_cancelled() {
                                results.push((index, Err("batch cancelled".to_string())));
                                continue;
                            }
                            let outcome =
                                op(&store, &vectors[index]).map_err(|e| e.to_string());
                            results.push((index, outcome));
                        }
                        (window.start, results)
                    }
                })
                .buffer_unordered(workers)
                .collect()
                .await;

        let mut items: Vec<(usize, std::result::Result<(), String>)> =
            outcomes.into_iter().flat_map(|(_, items)| items).collect();
        items.sort_by_key(|(index, _)| *index);

        for (index, outcome) in items {
            match outcome {
                Ok(()) => response.processed += 1,
                Err(message) => {
                    let code = if message == "batch cancelled" {
                        CODE_CANCELLED
                    } else {
                        CODE_VECTOR_OP_FAILED
                    };
                    response.errors.push(BatchError {
                        index,
                        code: code.to_string(),
                        message,
                    });
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // RAG batches
    // ------------------------------------------------------------------

    /// Convert each text into a RAG query and fan out through the engine.
    ///
    /// Responses come back in input order; the engine bounds concurrency to
    /// its `max_concurrent_queries`.
    pub async fn process_rag(
        &self,
        cancel: &CancellationToken,
        request: &BatchRagRequest,
    ) -> Result<Vec<RagResponse>> {
        if request.queries.is_empty() {
            return Err(QuiverError::EmptyInput);
        }
        if cancel.is_cancelled() {
            return Err(QuiverError::Cancelled);
        }

        let engine = self
            .rag
            .read()
            .clone()
            .ok_or_else(|| QuiverError::NotInitialized("RAG engine not attached".to_string()))?;

        let _guard = ActiveGuard::new(&self.active);
        let started = Instant::now();

        let queries: Vec<RagQuery> = request
            .queries
            .iter()
            .map(|text| RagQuery {
                text: text.clone(),
                context: request.context.clone(),
                max_results: request.max_results,
                ..Default::default()
            })
            .collect();

        let responses = engine.process_batch(cancel, queries).await?;
        self.record_batch(request.queries.len(), 0, started.elapsed());
        Ok(responses)
    }

    /// Wait for in-flight batches to finish and release resources.
    pub async fn close(&self) {
        while self.active.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(CLOSE_POLL_INTERVAL).await;
        }
        debug!("Batch processor closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::local::LocalProvider;
    use crate::embedding::service::EmbeddingServiceConfig;
    use crate::embedding::EmbeddingProvider;
    use crate::types::{EmbeddingResponse, EmbeddingUsage};
    use quiver_vector::{DistanceMetric, Vector, VectorMetadata};

    fn service() -> Arc<EmbeddingService> {
        let service = EmbeddingService::new(EmbeddingServiceConfig::default()).unwrap();
        service
            .register_provider(Arc::new(LocalProvider::with_defaults()))
            .unwrap();
        Arc::new(service)
    }

    fn processor() -> BatchProcessor {
        BatchProcessor::new(BatchConfig::default(), service(), VectorStore::new())
    }

    fn vector(id: &str, collection: &str, embedding: Vec<f64>) -> Vector {
        Vector::with_id(id, collection, embedding, None, VectorMetadata::new())
    }

    #[test]
    fn test_partition() {
        let windows = partition(10, 4);
        assert_eq!(windows.len(), 3);
        assert_eq!((windows[0].start, windows[0].end), (0, 4));
        assert_eq!((windows[1].start, windows[1].end), (4, 8));
        assert_eq!((windows[2].start, windows[2].end), (8, 10));
    }

    #[test]
    fn test_progress_snapshot_clamped() {
        let estimate = Duration::from_secs(10);
        assert_eq!(progress_snapshot(100, Duration::from_secs(5), estimate), 50);
        assert_eq!(progress_snapshot(100, Duration::from_secs(20), estimate), 100);
        assert_eq!(progress_snapshot(100, Duration::ZERO, estimate), 0);
        assert_eq!(progress_snapshot(100, Duration::from_secs(1), Duration::ZERO), 100);
    }

    #[test]
    fn test_estimate_processing_time() {
        let per_call = Duration::from_millis(100);
        assert_eq!(estimate_processing_time(8, 4, per_call), Duration::from_millis(200));
        assert_eq!(estimate_processing_time(1, 4, per_call), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_embedding_batch_row_correspondence() {
        let processor = processor();
        let cancel = CancellationToken::new();

        let texts: Vec<String> = (0..10).map(|i| format!("text number {}", i)).collect();
        let request = BatchEmbeddingRequest {
            texts: texts.clone(),
            model: "m".to_string(),
            batch_size: Some(3),
            ..Default::default()
        };

        let response = processor.process_embeddings(&cancel, &request).await.unwrap();
        assert_eq!(response.embeddings.len(), 10);
        assert!(response.errors.is_empty());
        assert!(response.total_tokens > 0);
        assert_eq!(response.batches_processed, 4);

        // Row i must equal the single-text embedding of text i.
        let single = LocalProvider::with_defaults();
        for (i, text) in texts.iter().enumerate() {
            let expected = single
                .generate_embeddings(&EmbeddingRequest::new(vec![text.clone()], "m"))
                .await
                .unwrap();
            assert_eq!(response.embeddings[i], expected.embeddings[0]);
        }
    }

    #[tokio::test]
    async fn test_embedding_batch_validation() {
        let processor = processor();
        let cancel = CancellationToken::new();

        let empty = BatchEmbeddingRequest::default();
        assert!(matches!(
            processor.process_embeddings(&cancel, &empty).await,
            Err(QuiverError::EmptyInput)
        ));

        let mut config = BatchConfig::default();
        config.max_batch_size = 2;
        let small = BatchProcessor::new(config, service(), VectorStore::new());
        let oversized = BatchEmbeddingRequest {
            texts: vec!["a".into(), "b".into(), "c".into()],
            model: "m".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            small.process_embeddings(&cancel, &oversized).await,
            Err(QuiverError::InputTooLarge { .. })
        ));

        let over_concurrent = BatchEmbeddingRequest {
            texts: vec!["a".into()],
            model: "m".to_string(),
            max_concurrent: Some(100),
            ..Default::default()
        };
        assert!(matches!(
            processor.process_embeddings(&cancel, &over_concurrent).await,
            Err(QuiverError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_embedding_batch_pre_cancelled() {
        let processor = processor();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = BatchEmbeddingRequest {
            texts: vec!["a".into()],
            model: "m".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            processor.process_embeddings(&cancel, &request).await,
            Err(QuiverError::Cancelled)
        ));
        assert_eq!(processor.active_batches(), 0);
    }

    /// Provider that fails any window containing the marker text.
    struct FlakyProvider;

    #[async_trait::async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn provider_type(&self) -> &str {
            "local"
        }

        fn name(&self) -> &str {
            "Flaky"
        }

        async fn generate_embeddings(
            &self,
            request: &EmbeddingRequest,
        ) -> Result<EmbeddingResponse> {
            if request.texts.iter().any(|t| t.contains("poison")) {
                return Err(QuiverError::Parse("bad window".into()));
            }
            Ok(EmbeddingResponse {
                embeddings: vec![vec![1.0, 0.0]; request.texts.len()],
                provider: "local".to_string(),
                usage: EmbeddingUsage {
                    total_tokens: request.texts.len(),
                    cost: 0.0,
                },
                ..Default::default()
            })
        }

        fn models(&self) -> Vec<crate::embedding::ModelInfo> {
            Vec::new()
        }

        fn capabilities(&self) -> crate::embedding::ProviderCapabilities {
            crate::embedding::ProviderCapabilities::default()
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_per_item_error_isolation() {
        let service = EmbeddingService::new(EmbeddingServiceConfig {
            retry: crate::embedding::RetryConfig {
                max_retries: 0,
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        service.register_provider(Arc::new(FlakyProvider)).unwrap();
        let processor =
            BatchProcessor::new(BatchConfig::default(), Arc::new(service), VectorStore::new());
        let cancel = CancellationToken::new();

        // Window size 2: ["ok-0","ok-1"], ["poison","ok-3"], ["ok-4"]
        let request = BatchEmbeddingRequest {
            texts: vec![
                "ok-0".into(),
                "ok-1".into(),
                "poison".into(),
                "ok-3".into(),
                "ok-4".into(),
            ],
            model: "m".to_string(),
            batch_size: Some(2),
            ..Default::default()
        };

        let response = processor.process_embeddings(&cancel, &request).await.unwrap();

        assert_eq!(response.embeddings.len(), 5);
        assert!(!response.embeddings[0].is_empty());
        assert!(!response.embeddings[1].is_empty());
        // The poisoned window's rows stay empty.
        assert!(response.embeddings[2].is_empty());
        assert!(response.embeddings[3].is_empty());
        assert!(!response.embeddings[4].is_empty());

        assert_eq!(response.errors.len(), 2);
        assert_eq!(response.errors[0].index, 2);
        assert_eq!(response.errors[1].index, 3);
        assert!(response
            .errors
            .iter()
            .all(|e| e.code == CODE_EMBEDDING_FAILED));
        assert_eq!(response.batches_processed, 2);
    }

    #[tokio::test]
    async fn test_vector_insert_and_search_batch() {
        let store = VectorStore::new();
        store
            .create_collection("docs", 2, DistanceMetric::Cosine)
            .unwrap();
        let processor = BatchProcessor::new(BatchConfig::default(), service(), store.clone());
        let cancel = CancellationToken::new();

        let insert = BatchVectorRequest {
            operation: VectorOp::Insert,
            collection: "docs".to_string(),
            vectors: vec![
                vector("a", "docs", vec![1.0, 0.0]),
                vector("b", "docs", vec![0.0, 1.0]),
            ],
            ids: Vec::new(),
            query_vector: None,
            k: None,
            max_concurrent: None,
        };
        let response = processor.process_vectors(&cancel, &insert).await.unwrap();
        assert_eq!(response.processed, 2);
        assert!(response.errors.is_empty());
        assert_eq!(store.count("docs").unwrap(), 2);

        let search = BatchVectorRequest {
            operation: VectorOp::Search,
            collection: "docs".to_string(),
            vectors: Vec::new(),
            ids: Vec::new(),
            query_vector: Some(vec![1.0, 0.0]),
            k: Some(1),
            max_concurrent: None,
        };
        let response = processor.process_vectors(&cancel, &search).await.unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].vector.id, "a");
    }

    #[tokio::test]
    async fn test_search_requires_query_vector() {
        let processor = processor();
        let cancel = CancellationToken::new();

        for operation in [VectorOp::Search, VectorOp::Similarity, VectorOp::Distance] {
            let request = BatchVectorRequest {
                operation,
                collection: "docs".to_string(),
                vectors: vec![vector("a", "docs", vec![1.0, 0.0])],
                ids: Vec::new(),
                query_vector: None,
                k: None,
                max_concurrent: None,
            };
            assert!(matches!(
                processor.process_vectors(&cancel, &request).await,
                Err(QuiverError::Configuration(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_normalize_returns_copies() {
        let processor = processor();
        let cancel = CancellationToken::new();

        let input = vector("v", "docs", vec![3.0, 4.0]);
        let request = BatchVectorRequest {
            operation: VectorOp::Normalize,
            collection: "docs".to_string(),
            vectors: vec![input.clone()],
            ids: Vec::new(),
            query_vector: None,
            k: None,
            max_concurrent: None,
        };

        let response = processor.process_vectors(&cancel, &request).await.unwrap();
        assert_eq!(response.vectors.len(), 1);
        assert!(response.vectors[0].normalized);
        assert_eq!(response.vectors[0].embedding, vec![0.6, 0.8]);
        // The input is untouched.
        assert!(!input.normalized);
        assert_eq!(input.embedding, vec![3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_similarity_and_distance_scores() {
        let processor = processor();
        let cancel = CancellationToken::new();

        let request = BatchVectorRequest {
            operation: VectorOp::Similarity,
            collection: "docs".to_string(),
            vectors: vec![
                vector("a", "docs", vec![1.0, 0.0]),
                vector("b", "docs", vec![0.0, 1.0]),
                vector("short", "docs", vec![1.0]),
            ],
            ids: Vec::new(),
            query_vector: Some(vec![1.0, 0.0]),
            k: None,
            max_concurrent: None,
        };

        let response = processor.process_vectors(&cancel, &request).await.unwrap();
        assert_eq!(response.processed, 2);
        assert!((response.scores[0] - 1.0).abs() < 1e-9);
        assert!(response.scores[1].abs() < 1e-9);
        assert!(response.scores[2].is_nan());
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].index, 2);

        let distance_request = BatchVectorRequest {
            operation: VectorOp::Distance,
            query_vector: Some(vec![0.0, 0.0]),
            vectors: vec![vector("a", "docs", vec![3.0, 4.0])],
            collection: "docs".to_string(),
            ids: Vec::new(),
            k: None,
            max_concurrent: None,
        };
        let response = processor
            .process_vectors(&cancel, &distance_request)
            .await
            .unwrap();
        assert!((response.scores[0] - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_delete_batch_counts_and_errors() {
        let store = VectorStore::new();
        store
            .create_collection("docs", 2, DistanceMetric::Cosine)
            .unwrap();
        store.insert(vector("a", "docs", vec![1.0, 0.0])).unwrap();
        let processor = BatchProcessor::new(BatchConfig::default(), service(), store.clone());
        let cancel = CancellationToken::new();

        let request = BatchVectorRequest {
            operation: VectorOp::Delete,
            collection: "docs".to_string(),
            vectors: Vec::new(),
            ids: vec!["a".to_string(), "missing".to_string()],
            query_vector: None,
            k: None,
            max_concurrent: None,
        };

        let response = processor.process_vectors(&cancel, &request).await.unwrap();
        assert_eq!(response.processed, 1);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].index, 1);
        assert_eq!(store.count("docs").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rag_batch_requires_engine() {
        let processor = processor();
        let cancel = CancellationToken::new();

        let request = BatchRagRequest {
            queries: vec!["q".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            processor.process_rag(&cancel, &request).await,
            Err(QuiverError::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_stats_accumulate() {
        let processor = processor();
        let cancel = CancellationToken::new();

        let request = BatchEmbeddingRequest {
            texts: vec!["a".into(), "b".into()],
            model: "m".to_string(),
            ..Default::default()
        };
        processor.process_embeddings(&cancel, &request).await.unwrap();
        processor.process_embeddings(&cancel, &request).await.unwrap();

        let stats = processor.stats();
        assert_eq!(stats.total_batches, 2);
        assert_eq!(stats.total_items, 4);
        assert_eq!(stats.total_errors, 0);
    }

    #[tokio::test]
    async fn test_close_waits_for_active() {
        let processor = Arc::new(processor());
        // No active batches: returns immediately.
        processor.close().await;
        assert_eq!(processor.active_batches(), 0);
    }
}
