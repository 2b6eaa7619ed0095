//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use quiver::embedding::{
    EmbeddingProvider, EmbeddingService, EmbeddingServiceConfig, LocalProvider, ModelInfo,
    ProviderCapabilities,
};
use quiver::types::{EmbeddingRequest, EmbeddingResponse, EmbeddingUsage, QuiverError, Result};
use std::sync::Arc;

/// Provider that always fails with `ProviderUnavailable`.
pub struct UnavailableProvider {
    tag: &'static str,
}

impl UnavailableProvider {
    pub fn new(tag: &'static str) -> Self {
        Self { tag }
    }
}

#[async_trait]
impl EmbeddingProvider for UnavailableProvider {
    fn provider_type(&self) -> &str {
        self.tag
    }

    fn name(&self) -> &str {
        self.tag
    }

    async fn generate_embeddings(&self, _request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        Err(QuiverError::ProviderUnavailable(self.tag.to_string()))
    }

    fn models(&self) -> Vec<ModelInfo> {
        Vec::new()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }

    async fn health_check(&self) -> Result<()> {
        Err(QuiverError::ProviderUnavailable(self.tag.to_string()))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Provider answering a fixed embedding for every text.
pub struct FixedProvider {
    tag: &'static str,
    row: Vec<f64>,
}

impl FixedProvider {
    pub fn new(tag: &'static str, row: Vec<f64>) -> Self {
        Self { tag, row }
    }
}

#[async_trait]
impl EmbeddingProvider for FixedProvider {
    fn provider_type(&self) -> &str {
        self.tag
    }

    fn name(&self) -> &str {
        self.tag
    }

    async fn generate_embeddings(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        Ok(EmbeddingResponse {
            embeddings: vec![self.row.clone(); request.texts.len()],
            model: request.model.clone(),
            provider: self.tag.to_string(),
            usage: EmbeddingUsage {
                total_tokens: request.texts.len(),
                cost: 0.0,
            },
            ..Default::default()
        })
    }

    fn models(&self) -> Vec<ModelInfo> {
        Vec::new()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Install a subscriber for test debugging; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A service with just the local deterministic provider registered.
pub fn local_service(config: EmbeddingServiceConfig) -> Arc<EmbeddingService> {
    init_tracing();
    let service = EmbeddingService::new(config).expect("service config");
    service
        .register_provider(Arc::new(LocalProvider::with_defaults()))
        .expect("register local");
    Arc::new(service)
}
