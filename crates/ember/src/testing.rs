//! Test utilities for ember - deterministic embedders and scripted extractors
//!
//! These stand in for the fastembed model and the remote extraction API so
//! unit and integration tests run without network access or model downloads.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::embedding::{EMBEDDING_DIMENSION, EmbeddingProvider};
use crate::error::{EmberError, Result};
use crate::extraction::{ExtractionCollaborator, ExtractorError, RawExtraction};

/// Produces deterministic unit-length 384-dimensional vectors from a hash of
/// the input text
#[derive(Debug, Clone, Default)]
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn new() -> Self {
        Self
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();

        let raw: Vec<f32> = (0..EMBEDDING_DIMENSION)
            .map(|i| {
                let x = seed
                    .wrapping_mul(i as u64 + 1)
                    .wrapping_add(0x9e3779b97f4a7c15);
                let normalized = (x as f32) / (u64::MAX as f32);
                (normalized * 2.0) - 1.0
            })
            .collect();

        let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return raw;
        }
        raw.into_iter().map(|v| v / norm).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }

    fn name(&self) -> &'static str {
        "hash"
    }
}

/// Returns hand-picked vectors for known texts and a fallback for the rest
///
/// Lets tests control cosine similarities exactly.
#[derive(Debug, Clone)]
pub struct FixedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
}

impl FixedEmbedder {
    pub fn new(fallback: Vec<f32>) -> Self {
        Self {
            vectors: HashMap::new(),
            fallback,
        }
    }

    pub fn with(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.into(), vector);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }

    fn dimension(&self) -> usize {
        self.fallback.len()
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Always fails, as an unreachable embedding service would
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(EmberError::EmbeddingUnavailable(
            "embedding service offline".to_string(),
        ))
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Never answers, as a stalled embedding service would
#[derive(Debug, Clone, Copy, Default)]
pub struct HangingEmbedder;

#[async_trait]
impl EmbeddingProvider for HangingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        std::future::pending().await
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }

    fn name(&self) -> &'static str {
        "hanging"
    }
}

/// Extraction collaborator that replays a fixed response
///
/// The first `failures` calls return an API error; later calls return the
/// scripted extraction. Every call is counted, and each one sleeps for
/// `delay` first.
#[derive(Debug, Clone)]
pub struct ScriptedExtractor {
    response: Option<RawExtraction>,
    failures: usize,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl ScriptedExtractor {
    pub fn always(response: RawExtraction) -> Self {
        Self::fail_then(0, response)
    }

    pub fn failing() -> Self {
        Self {
            response: None,
            failures: usize::MAX,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_then(failures: usize, response: RawExtraction) -> Self {
        Self {
            response: Some(response),
            failures,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Shared call counter, still readable after the extractor is moved
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl ExtractionCollaborator for ScriptedExtractor {
    async fn extract(
        &self,
        _batch_text: &str,
        _user_identity: &str,
    ) -> std::result::Result<RawExtraction, ExtractorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.response {
            Some(response) if call >= self.failures => Ok(response.clone()),
            _ => Err(ExtractorError::ApiError("scripted failure".to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
