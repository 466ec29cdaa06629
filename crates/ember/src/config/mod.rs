use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{EmberError, Result};

/// Main configuration structure for Ember
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// SQLite storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Composite score weights and decay half-lives
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Session warmth boosts and decay
    #[serde(default)]
    pub warmth: WarmthConfig,
    /// Query-time retrieval limits and thresholds
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Background extraction pipeline
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Remote extraction collaborator
    #[serde(default)]
    pub extractor: ExtractorConfig,
}

impl Config {
    /// Load configuration from an explicit path, or from the first default
    /// location that exists, falling back to built-in defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::from_file(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".ember").join("config.toml")),
            dirs::config_dir().map(|c| c.join("ember").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Parse a TOML config file and validate it
    pub fn from_file(path: &Path) -> Result<Self> {
        tracing::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            EmberError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string and validate it
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| EmberError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break pipeline or scoring invariants
    pub fn validate(&self) -> Result<()> {
        let s = &self.scoring;
        for (name, w) in [
            ("semantic_weight", s.semantic_weight),
            ("importance_weight", s.importance_weight),
            ("freshness_weight", s.freshness_weight),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(EmberError::Config(format!(
                    "scoring.{name} must be within [0, 1], got {w}"
                )));
            }
        }
        if s.standard_half_life_days <= 0.0 || s.ephemeral_half_life_days <= 0.0 {
            return Err(EmberError::Config(
                "scoring half-lives must be positive".to_string(),
            ));
        }

        let e = &self.extraction;
        if e.batch_size == 0 {
            return Err(EmberError::Config(
                "extraction.batch_size must be at least 1".to_string(),
            ));
        }
        if e.batch_size > e.overflow_trigger {
            return Err(EmberError::Config(format!(
                "extraction.batch_size ({}) cannot exceed extraction.overflow_trigger ({})",
                e.batch_size, e.overflow_trigger
            )));
        }
        if e.context_window_size >= e.overflow_trigger {
            return Err(EmberError::Config(format!(
                "extraction.context_window_size ({}) must be below extraction.overflow_trigger ({})",
                e.context_window_size, e.overflow_trigger
            )));
        }
        if !(1..=10).contains(&e.importance_floor) {
            return Err(EmberError::Config(format!(
                "extraction.importance_floor must be a 1-10 rating, got {}",
                e.importance_floor
            )));
        }

        for (name, value) in [
            ("retrieval.embed_timeout_ms", self.retrieval.embed_timeout_ms),
            ("extraction.embed_timeout_ms", e.embed_timeout_ms),
            ("extraction.collaborator_timeout_ms", e.collaborator_timeout_ms),
            ("extraction.watch_interval_secs", e.watch_interval_secs),
            ("extractor.timeout_secs", self.extractor.timeout_secs),
        ] {
            if value == 0 {
                return Err(EmberError::Config(format!("{name} must be positive")));
            }
        }
        if self.extractor.max_attempts == 0 {
            return Err(EmberError::Config(
                "extractor.max_attempts must be at least 1".to_string(),
            ));
        }

        let w = &self.warmth;
        if w.cap < 0.0 || w.retrieval_boost < 0.0 || w.topic_boost < 0.0 {
            return Err(EmberError::Config(
                "warmth boosts and cap must be non-negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&w.retrieval_decay) || !(0.0..=1.0).contains(&w.topic_decay) {
            return Err(EmberError::Config(
                "warmth decay multipliers must be within [0, 1]".to_string(),
            ));
        }

        Ok(())
    }
}

/// SQLite storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// How long a connection waits on a locked database before SQLite gives up
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
    /// Maximum concurrent reader connections
    #[serde(default = "default_max_readers")]
    pub max_readers: u32,
    /// Retry policy for writes that hit lock contention
    #[serde(default)]
    pub write_retry: WriteRetryConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            busy_timeout_secs: default_busy_timeout_secs(),
            max_readers: default_max_readers(),
            write_retry: WriteRetryConfig::default(),
        }
    }
}

fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".ember").join("ember.db"))
        .unwrap_or_else(|| PathBuf::from(".ember/ember.db"))
}

fn default_busy_timeout_secs() -> u64 {
    5
}

fn default_max_readers() -> u32 {
    8
}

/// Exponential backoff for contended writes
#[derive(Debug, Clone, Deserialize)]
pub struct WriteRetryConfig {
    #[serde(default = "default_write_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_write_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_write_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_write_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for WriteRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_write_max_retries(),
            initial_delay_ms: default_write_initial_delay_ms(),
            max_delay_ms: default_write_max_delay_ms(),
            backoff_multiplier: default_write_backoff_multiplier(),
        }
    }
}

fn default_write_max_retries() -> u32 {
    5
}

fn default_write_initial_delay_ms() -> u64 {
    100
}

fn default_write_max_delay_ms() -> u64 {
    10_000
}

fn default_write_backoff_multiplier() -> f64 {
    2.0
}

/// Composite score weights and freshness half-lives
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,
    #[serde(default = "default_importance_weight")]
    pub importance_weight: f32,
    #[serde(default = "default_freshness_weight")]
    pub freshness_weight: f32,
    /// Half-life in days for `standard` memories
    #[serde(default = "default_standard_half_life_days")]
    pub standard_half_life_days: f64,
    /// Half-life in days for `ephemeral` memories
    #[serde(default = "default_ephemeral_half_life_days")]
    pub ephemeral_half_life_days: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            importance_weight: default_importance_weight(),
            freshness_weight: default_freshness_weight(),
            standard_half_life_days: default_standard_half_life_days(),
            ephemeral_half_life_days: default_ephemeral_half_life_days(),
        }
    }
}

fn default_semantic_weight() -> f32 {
    0.65
}

fn default_importance_weight() -> f32 {
    0.25
}

fn default_freshness_weight() -> f32 {
    0.10
}

fn default_standard_half_life_days() -> f64 {
    30.0
}

fn default_ephemeral_half_life_days() -> f64 {
    7.0
}

/// Session-scoped warmth configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WarmthConfig {
    #[serde(default = "default_retrieval_boost")]
    pub retrieval_boost: f32,
    /// Per-turn multiplier applied to retrieval warmth
    #[serde(default = "default_retrieval_decay")]
    pub retrieval_decay: f32,
    #[serde(default = "default_topic_boost")]
    pub topic_boost: f32,
    /// Per-turn multiplier applied to topic warmth
    #[serde(default = "default_topic_decay")]
    pub topic_decay: f32,
    /// Upper bound on retrieval + topic warmth for a single memory
    #[serde(default = "default_warmth_cap")]
    pub cap: f32,
    /// Entries whose combined warmth decays below this are dropped
    #[serde(default = "default_prune_threshold")]
    pub prune_threshold: f32,
    /// Cosine similarity a memory needs to a retrieved one to become topic-warm
    #[serde(default = "default_topic_similarity_threshold")]
    pub topic_similarity_threshold: f32,
    /// Maximum memories topic-warmed by a single query
    #[serde(default = "default_topic_max_expansion")]
    pub topic_max_expansion: usize,
    /// Maximum warmth entries kept per session
    #[serde(default = "default_warmth_max_entries")]
    pub max_entries: usize,
}

impl Default for WarmthConfig {
    fn default() -> Self {
        Self {
            retrieval_boost: default_retrieval_boost(),
            retrieval_decay: default_retrieval_decay(),
            topic_boost: default_topic_boost(),
            topic_decay: default_topic_decay(),
            cap: default_warmth_cap(),
            prune_threshold: default_prune_threshold(),
            topic_similarity_threshold: default_topic_similarity_threshold(),
            topic_max_expansion: default_topic_max_expansion(),
            max_entries: default_warmth_max_entries(),
        }
    }
}

fn default_retrieval_boost() -> f32 {
    0.15
}

fn default_retrieval_decay() -> f32 {
    0.6
}

fn default_topic_boost() -> f32 {
    0.10
}

fn default_topic_decay() -> f32 {
    0.5
}

fn default_warmth_cap() -> f32 {
    0.20
}

fn default_prune_threshold() -> f32 {
    1e-3
}

fn default_topic_similarity_threshold() -> f32 {
    0.75
}

fn default_topic_max_expansion() -> usize {
    20
}

fn default_warmth_max_entries() -> usize {
    1000
}

/// Query-time retrieval configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    /// Minimum final score a memory needs to be returned
    #[serde(default = "default_relevance_floor")]
    pub relevance_floor: f32,
    #[serde(default = "default_max_results")]
    pub max_episodic: usize,
    #[serde(default = "default_max_results")]
    pub max_factual: usize,
    #[serde(default = "default_dedup_enabled")]
    pub dedup_enabled: bool,
    /// Cosine similarity at which two results count as duplicates
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,
    /// Base score above which a regular memory is promoted to core
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: f32,
    /// Timeout for embedding the query text, in milliseconds
    #[serde(default = "default_embed_timeout_ms")]
    pub embed_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            relevance_floor: default_relevance_floor(),
            max_episodic: default_max_results(),
            max_factual: default_max_results(),
            dedup_enabled: default_dedup_enabled(),
            dedup_threshold: default_dedup_threshold(),
            promotion_threshold: default_promotion_threshold(),
            embed_timeout_ms: default_embed_timeout_ms(),
        }
    }
}

fn default_relevance_floor() -> f32 {
    0.35
}

fn default_max_results() -> usize {
    5
}

fn default_dedup_enabled() -> bool {
    true
}

fn default_dedup_threshold() -> f32 {
    0.85
}

fn default_promotion_threshold() -> f32 {
    0.85
}

fn default_embed_timeout_ms() -> u64 {
    10_000
}

/// Background extraction pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    /// Most recent unprocessed turns kept out of extraction on a forced run
    #[serde(default = "default_context_window_size")]
    pub context_window_size: usize,
    /// Unprocessed turn count that triggers a batch
    #[serde(default = "default_overflow_trigger")]
    pub overflow_trigger: usize,
    /// Oldest unprocessed turns extracted per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_episodic_candidates")]
    pub max_episodic: usize,
    #[serde(default = "default_max_factual_candidates")]
    pub max_factual: usize,
    /// Candidates rated below this (1-10) are discarded
    #[serde(default = "default_importance_floor")]
    pub importance_floor: u8,
    /// Seconds between watcher ticks
    #[serde(default = "default_watch_interval_secs")]
    pub watch_interval_secs: u64,
    /// Timeout for one collaborator call, in milliseconds
    #[serde(default = "default_collaborator_timeout_ms")]
    pub collaborator_timeout_ms: u64,
    /// Timeout for embedding one accepted candidate, in milliseconds
    #[serde(default = "default_embed_timeout_ms")]
    pub embed_timeout_ms: u64,
    #[serde(default = "default_extraction_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Name used for user turns in batch text
    #[serde(default = "default_user_name")]
    pub user_name: String,
    /// Name used for assistant turns in batch text
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            context_window_size: default_context_window_size(),
            overflow_trigger: default_overflow_trigger(),
            batch_size: default_batch_size(),
            max_episodic: default_max_episodic_candidates(),
            max_factual: default_max_factual_candidates(),
            importance_floor: default_importance_floor(),
            watch_interval_secs: default_watch_interval_secs(),
            collaborator_timeout_ms: default_collaborator_timeout_ms(),
            embed_timeout_ms: default_embed_timeout_ms(),
            max_retries: default_extraction_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            user_name: default_user_name(),
            assistant_name: default_assistant_name(),
        }
    }
}

fn default_context_window_size() -> usize {
    30
}

fn default_overflow_trigger() -> usize {
    40
}

fn default_batch_size() -> usize {
    10
}

fn default_max_episodic_candidates() -> usize {
    6
}

fn default_max_factual_candidates() -> usize {
    8
}

fn default_importance_floor() -> u8 {
    3
}

fn default_watch_interval_secs() -> u64 {
    5
}

fn default_collaborator_timeout_ms() -> u64 {
    120_000
}

fn default_extraction_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_user_name() -> String {
    "User".to_string()
}

fn default_assistant_name() -> String {
    "Assistant".to_string()
}

/// Embedding model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// fastembed model identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Expected embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    /// Model cache directory (fastembed default when unset)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            cache_dir: None,
        }
    }
}

fn default_embedding_model() -> String {
    "all-minilm-l6-v2".to_string()
}

fn default_embedding_dimension() -> usize {
    384
}

/// Remote extraction collaborator (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_extractor_model")]
    pub model: String,
    /// HTTP client timeout
    #[serde(default = "default_extractor_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// HTTP attempts per extraction call; the pipeline retries on top of this
    #[serde(default = "default_extractor_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key_env: default_api_key_env(),
            model: default_extractor_model(),
            timeout_secs: default_extractor_timeout_secs(),
            max_tokens: default_max_tokens(),
            max_attempts: default_extractor_max_attempts(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_extractor_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_extractor_timeout_secs() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_extractor_max_attempts() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.scoring.semantic_weight, 0.65);
        assert_eq!(config.scoring.importance_weight, 0.25);
        assert_eq!(config.scoring.freshness_weight, 0.10);
        assert_eq!(config.warmth.cap, 0.20);
        assert_eq!(config.retrieval.relevance_floor, 0.35);
        assert_eq!(config.retrieval.max_episodic, 5);
        assert_eq!(config.extraction.overflow_trigger, 40);
        assert_eq!(config.extraction.batch_size, 10);
        assert_eq!(config.embedding.dimension, 384);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [retrieval]
            max_factual = 3

            [extraction]
            user_name = "Sam"
            "#,
        )
        .unwrap();

        assert_eq!(config.retrieval.max_factual, 3);
        assert_eq!(config.retrieval.max_episodic, 5);
        assert_eq!(config.extraction.user_name, "Sam");
        assert_eq!(config.extraction.assistant_name, "Assistant");
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.storage.busy_timeout_secs, 5);
        assert_eq!(config.storage.write_retry.max_retries, 5);
    }

    #[test]
    fn test_rejects_batch_larger_than_trigger() {
        let err = Config::from_toml(
            r#"
            [extraction]
            batch_size = 50
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, EmberError::Config(_)));
    }

    #[test]
    fn test_rejects_out_of_range_weight() {
        let err = Config::from_toml(
            r#"
            [scoring]
            semantic_weight = 1.5
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("semantic_weight"));
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        for toml in [
            "[retrieval]\nembed_timeout_ms = 0\n",
            "[extraction]\ncollaborator_timeout_ms = 0\n",
            "[extraction]\nembed_timeout_ms = 0\n",
            "[extractor]\nmax_attempts = 0\n",
        ] {
            let err = Config::from_toml(toml).unwrap_err();
            assert!(matches!(err, EmberError::Config(_)), "accepted {toml:?}");
        }
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml("[storage").unwrap_err();
        assert!(matches!(err, EmberError::Config(_)));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[warmth]\nretrieval_boost = 0.1\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.warmth.retrieval_boost, 0.1);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let err = Config::load(Some(Path::new("/nonexistent/ember.toml"))).unwrap_err();
        assert!(matches!(err, EmberError::Config(_)));
    }
}
