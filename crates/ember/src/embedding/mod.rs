//! Text embedding providers
//!
//! The engine only sees the [`EmbeddingProvider`] trait. The bundled
//! implementation runs a local fastembed model on the blocking pool.

mod local;

use async_trait::async_trait;

use crate::error::Result;

pub use local::FastEmbedProvider;

/// Dimension of the bundled embedding models
pub const EMBEDDING_DIMENSION: usize = 384;

/// Turns text into a fixed-length vector
///
/// Implementations must be deterministic for the same input and report
/// failures as [`crate::EmberError::EmbeddingUnavailable`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}
