//! End-to-end RAG pipeline tests.

mod common;

use common::local_service;
use quiver::api::{CreateIndexRequest, InsertVector, QuiverApi, RagRequest};
use quiver::batch::{BatchConfig, BatchProcessor, BatchRagRequest};
use quiver::rag::{RagConfig, RagEngine};
use quiver::types::{EmbeddingRequest, RagQuery};
use quiver::EmbeddingServiceConfig;
use quiver_vector::VectorStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DIMENSION: usize = 384; // local provider output

struct Fixture {
    api: QuiverApi,
    engine: Arc<RagEngine>,
    batch: Arc<BatchProcessor>,
    service: Arc<quiver::EmbeddingService>,
}

async fn fixture() -> Fixture {
    let service = local_service(EmbeddingServiceConfig::default());
    let store = VectorStore::new();
    let engine = Arc::new(RagEngine::new(
        RagConfig::default(),
        service.clone(),
        store.clone(),
    ));
    let batch = Arc::new(BatchProcessor::new(
        BatchConfig::default(),
        service.clone(),
        store.clone(),
    ));
    let api = QuiverApi::new(store, engine.clone(), batch.clone());

    api.create_index(
        &serde_json::from_value::<CreateIndexRequest>(serde_json::json!({
            "id": "documents",
            "dimension": DIMENSION,
            "distance_metric": "cosine"
        }))
        .unwrap(),
    )
    .unwrap();

    Fixture {
        api,
        engine,
        batch,
        service,
    }
}

async fn seed(fixture: &Fixture, id: &str, text: &str) {
    let cancel = CancellationToken::new();
    let response = fixture
        .service
        .generate_embeddings(
            &cancel,
            &EmbeddingRequest::new(vec![text.to_string()], String::new()),
        )
        .await
        .unwrap();

    fixture
        .api
        .insert_vectors(
            "documents",
            vec![InsertVector {
                id: id.to_string(),
                collection: String::new(),
                embedding: response.embeddings[0].clone(),
                metadata: HashMap::from([("text".to_string(), serde_json::json!(text))]),
            }],
        )
        .unwrap();
}

#[tokio::test]
async fn end_to_end_rag_with_expansion_and_cache() {
    let fixture = fixture().await;
    seed(&fixture, "bread", "a guide to baking bread at home").await;
    seed(&fixture, "pasta", "cooking pasta from scratch").await;
    let cancel = CancellationToken::new();

    let query = RagQuery::new("how to bake bread")
        .with_context("domain", serde_json::json!("culinary"));

    let first = fixture.engine.process_query(&cancel, &query).await.unwrap();

    for expected in ["tutorial", "guide", "instructions", "steps"] {
        assert!(
            first.expansion_terms.iter().any(|t| t == expected),
            "expansion terms missing {}",
            expected
        );
    }
    assert!(!first.results.is_empty());
    assert!(first.processing_time > Duration::ZERO);

    // Second identical query is served from cache with identical results.
    let second = fixture.engine.process_query(&cancel, &query).await.unwrap();
    assert_eq!(fixture.engine.stats().cache_hits, 1);
    assert_eq!(first.results.len(), second.results.len());
    for (a, b) in first.results.iter().zip(second.results.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.score, b.score);
    }
}

#[tokio::test]
async fn rag_results_are_relevance_ordered() {
    let fixture = fixture().await;
    seed(&fixture, "bread", "how to bake bread: a step by step bread guide").await;
    seed(&fixture, "trains", "the history of steam locomotives").await;
    let cancel = CancellationToken::new();

    let response = fixture
        .engine
        .process_query(&cancel, &RagQuery::new("how to bake bread"))
        .await
        .unwrap();

    assert_eq!(response.results[0].id, "bread");
    for pair in response.results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for result in &response.results {
        assert!((result.relevance - (1.0 - result.distance)).abs() < 1e-12);
    }
}

#[tokio::test]
async fn facade_end_to_end_operation() {
    let fixture = fixture().await;
    seed(&fixture, "bread", "bread baking instructions").await;
    let cancel = CancellationToken::new();

    let request = RagRequest {
        operation: "end_to_end_rag".to_string(),
        query: "how to bake bread".to_string(),
        context: HashMap::new(),
        collection: "documents".to_string(),
        options: HashMap::from([("include_metadata".to_string(), serde_json::json!(true))]),
        rag_config: HashMap::new(),
    };
    let envelope = fixture.api.rag(&cancel, &request).await.unwrap();

    let response = envelope.response.unwrap();
    assert_eq!(response.results[0].id, "bread");
    assert!(response.results[0].metadata.is_some());
}

#[tokio::test]
async fn batch_rag_preserves_order() {
    let fixture = fixture().await;
    seed(&fixture, "bread", "bread baking").await;
    seed(&fixture, "rust", "rust programming").await;
    let cancel = CancellationToken::new();

    let request = BatchRagRequest {
        queries: vec![
            "baking bread".to_string(),
            "rust language".to_string(),
            "something else".to_string(),
        ],
        context: HashMap::new(),
        max_results: Some(2),
    };
    let responses = fixture.batch.process_rag(&cancel, &request).await.unwrap();

    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0].query.text, "baking bread");
    assert_eq!(responses[1].query.text, "rust language");
    for response in &responses {
        assert!(response.results.len() <= 2);
    }
}

#[tokio::test]
async fn batch_embeddings_feed_the_index() {
    let fixture = fixture().await;
    let cancel = CancellationToken::new();

    let texts = vec![
        "first document".to_string(),
        "second document".to_string(),
        "third document".to_string(),
    ];
    let request = quiver::batch::BatchEmbeddingRequest {
        texts: texts.clone(),
        model: String::new(),
        batch_size: Some(2),
        ..Default::default()
    };
    let response = fixture
        .batch
        .process_embeddings(&cancel, &request)
        .await
        .unwrap();
    assert_eq!(response.embeddings.len(), 3);
    assert!(response.errors.is_empty());

    let vectors = texts
        .iter()
        .zip(response.embeddings.iter())
        .enumerate()
        .map(|(i, (_text, embedding))| InsertVector {
            id: format!("doc-{}", i),
            collection: String::new(),
            embedding: embedding.clone(),
            metadata: HashMap::new(),
        })
        .collect();
    assert_eq!(fixture.api.insert_vectors("documents", vectors).unwrap(), 3);

    // The first document is its own nearest neighbor.
    let hits = fixture
        .api
        .search("documents", &response.embeddings[0], 1)
        .unwrap();
    assert_eq!(hits[0].vector.id, "doc-0");
}
