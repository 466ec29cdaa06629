use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{EmberError, Result};

/// Local fastembed model shared behind a mutex
///
/// Inference is CPU-bound, so each call runs on tokio's blocking pool.
#[derive(Clone)]
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Load the model named in `config` (downloading it on first use)
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = parse_model(&config.model)?;
        let mut options = InitOptions::new(model);
        if let Some(dir) = &config.cache_dir {
            options = options.with_cache_dir(dir.clone());
        }

        let embedding = TextEmbedding::try_new(options)
            .map_err(|e| EmberError::EmbeddingUnavailable(e.to_string()))?;

        tracing::info!(model = %config.model, "Loaded embedding model");

        Ok(Self {
            model: Arc::new(Mutex::new(embedding)),
            dimension: config.dimension,
        })
    }
}

fn parse_model(name: &str) -> Result<FastEmbedModel> {
    match name.to_ascii_lowercase().as_str() {
        "all-minilm-l6-v2" => Ok(FastEmbedModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(FastEmbedModel::BGESmallENV15),
        "multilingual-e5-small" => Ok(FastEmbedModel::MultilingualE5Small),
        other => Err(EmberError::Config(format!(
            "unsupported embedding model '{other}' (expected all-minilm-l6-v2, bge-small-en-v1.5 or multilingual-e5-small)"
        ))),
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();

        let embedding = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmberError::EmbeddingUnavailable("model lock poisoned".to_string()))?;
            let mut out = model
                .embed(vec![text], None)
                .map_err(|e| EmberError::EmbeddingUnavailable(e.to_string()))?;
            out.pop()
                .ok_or_else(|| EmberError::EmbeddingUnavailable("no embedding returned".to_string()))
        })
        .await
        .map_err(|e| EmberError::EmbeddingUnavailable(format!("embedding task failed: {e}")))??;

        if embedding.len() != self.dimension {
            return Err(EmberError::EmbeddingUnavailable(format!(
                "expected {} dimensions, model returned {}",
                self.dimension,
                embedding.len()
            )));
        }
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &'static str {
        "fastembed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_model_names() {
        assert!(parse_model("all-minilm-l6-v2").is_ok());
        assert!(parse_model("BGE-small-en-v1.5").is_ok());
        assert!(parse_model("multilingual-e5-small").is_ok());
        assert!(matches!(parse_model("gpt-embed"), Err(EmberError::Config(_))));
    }

    #[cfg(feature = "ml-tests")]
    #[tokio::test]
    async fn test_real_model_embeds_with_expected_dimension() {
        let provider = FastEmbedProvider::new(&EmbeddingConfig::default()).unwrap();
        let v = provider.embed("Hello, world!").await.unwrap();
        assert_eq!(v.len(), crate::embedding::EMBEDDING_DIMENSION);
    }
}
