//! Embedding provider seam.
//!
//! The embedding provider is an external collaborator
//! (`generate`/`generateBatch`/`healthCheck`/`type`/`isAvailable`) consumed
//! through one interface; this crate is never the provider itself.
//! `swarm-core` defines the trait and ships only [`NoneProvider`], which
//! always reports unavailable and drives `semanticSearchByText`'s
//! substring-search fallback; real OpenAI/Ollama clients are out of scope.

use crate::error::{Error, Result};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Ollama,
    None,
}

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub embedding: Vec<f32>,
    pub model: String,
    pub tokens_used: u32,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;
    fn is_available(&self) -> bool;
    async fn generate(&self, text: &str) -> Result<EmbeddingResult>;
    async fn generate_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingResult>>;
    async fn health_check(&self) -> bool;
}

/// The default provider: always unavailable, so callers fall back to text
/// search rather than silently returning zero vectors.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneProvider;

#[async_trait]
impl EmbeddingProvider for NoneProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::None
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn generate(&self, _text: &str) -> Result<EmbeddingResult> {
        Err(Error::external_unavailable("no embedding provider configured"))
    }

    async fn generate_batch(&self, _texts: &[String]) -> Result<Vec<EmbeddingResult>> {
        Err(Error::external_unavailable("no embedding provider configured"))
    }

    async fn health_check(&self) -> bool {
        false
    }
}
