//! Decay-aware relevance scoring
//!
//! Pure functions combining semantic similarity, importance and freshness
//! into a single score:
//!
//! ```text
//! base  = 0.65 * semantic + 0.25 * importance + 0.10 * freshness
//! final = min(base + warmth, 1.0)
//! ```
//!
//! Identical inputs always produce identical scores. Nothing here fails;
//! out-of-range inputs are clamped.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ScoringConfig;
use crate::memory::types::{DecayCategory, Memory};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Every component that went into a memory's final score
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub semantic: f32,
    pub importance: f32,
    pub freshness: f32,
    pub base: f32,
    pub warmth: f32,
    pub final_score: f32,
}

/// A memory together with how it scored against a query
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub score: ScoreBreakdown,
}

impl ScoredMemory {
    pub fn final_score(&self) -> f32 {
        self.score.final_score
    }
}

/// Cosine similarity in [-1, 1]; mismatched, empty or zero vectors give 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Semantic relevance: cosine similarity clamped to [0, 1]
pub fn semantic(query: &[f32], memory: &[f32]) -> f32 {
    cosine_similarity(query, memory).clamp(0.0, 1.0)
}

/// Age in fractional days, never negative
pub fn age_days(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - created_at).num_milliseconds();
    (millis as f64 / 1000.0 / SECONDS_PER_DAY).max(0.0)
}

/// Exponential freshness decay: `2^(-age / half_life)`, 1.0 for permanent memories
pub fn freshness(
    decay: DecayCategory,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &ScoringConfig,
) -> f32 {
    let half_life = match decay {
        DecayCategory::Permanent => return 1.0,
        DecayCategory::Standard => config.standard_half_life_days,
        DecayCategory::Ephemeral => config.ephemeral_half_life_days,
    };

    let age = age_days(created_at, now);
    (2f64.powf(-age / half_life) as f32).clamp(0.0, 1.0)
}

/// Weighted sum of the three relevance components, before warmth
pub fn base_score(semantic: f32, importance: f32, freshness: f32, config: &ScoringConfig) -> f32 {
    let score = config.semantic_weight * semantic.clamp(0.0, 1.0)
        + config.importance_weight * importance.clamp(0.0, 1.0)
        + config.freshness_weight * freshness.clamp(0.0, 1.0);
    score.clamp(0.0, 1.0)
}

/// Base score plus warmth, capped at 1.0
pub fn final_score(base: f32, warmth: f32) -> f32 {
    (base + warmth.max(0.0)).clamp(0.0, 1.0)
}

/// Score one memory against a query embedding
pub fn score_memory(
    query: &[f32],
    memory: &Memory,
    now: DateTime<Utc>,
    warmth: f32,
    config: &ScoringConfig,
) -> ScoreBreakdown {
    let semantic = semantic(query, &memory.embedding);
    let importance = memory.importance.clamp(0.0, 1.0);
    let freshness = freshness(memory.decay_category, memory.created_at, now, config);
    let base = base_score(semantic, importance, freshness, config);
    let warmth = warmth.max(0.0);

    ScoreBreakdown {
        semantic,
        importance,
        freshness,
        base,
        warmth,
        final_score: final_score(base, warmth),
    }
}
