//! Query-time retrieval
//!
//! For each query:
//! 1. Embed the text once (bounded by a timeout)
//! 2. Score every regular memory per track, adding session warmth
//! 3. Drop results below the relevance floor
//! 4. Collapse near-duplicates within each track
//! 5. Rank and keep the top results per track
//! 6. Warm the returned memories and their close neighbours
//!
//! Steps 2-6 hold the session's warmth lock. Memories whose pre-warmth base
//! score clears the promotion threshold are promoted to core afterwards.
//! Core memories are returned with every result.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::config::{RetrievalConfig, ScoringConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{EmberError, Result};
use crate::memory::dedup::{deduplicate, rank_order};
use crate::memory::promotion;
use crate::memory::scoring::{ScoredMemory, score_memory};
use crate::memory::session::Session;
use crate::memory::types::{CoreMemory, Memory, Track};
use crate::memory::warmth::{TopicCandidate, WarmthCache};
use crate::storage::SqliteStore;

/// Ranked memories for one query
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub episodic: Vec<ScoredMemory>,
    pub factual: Vec<ScoredMemory>,
    /// Every core memory, including any promoted by this query
    pub core: Vec<CoreMemory>,
    /// Regular memories promoted to core by this query
    pub promoted: Vec<Uuid>,
    /// Memories topic-warmed by this query
    pub topic_warmed: usize,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.episodic.is_empty() && self.factual.is_empty() && self.core.is_empty()
    }

    /// Render as a `<relevant_memories>` block for prompt injection
    ///
    /// Returns `None` when there is nothing to show. Memories promoted by
    /// this query are listed once, under core.
    pub fn to_prompt_block(&self, now: DateTime<Utc>) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let fresh = |r: &&ScoredMemory| !self.promoted.contains(&r.memory.id);
        let mut lines = vec!["<relevant_memories>".to_string()];

        if !self.core.is_empty() {
            lines.push("Always true:".to_string());
            lines.extend(self.core.iter().map(|c| format!("- {}", c.content)));
            lines.push(String::new());
        }

        let factual: Vec<&ScoredMemory> = self.factual.iter().filter(fresh).collect();
        if !factual.is_empty() {
            lines.push("What I know:".to_string());
            lines.extend(factual.iter().map(|r| format!("- {}", r.memory.content)));
            lines.push(String::new());
        }

        let episodic: Vec<&ScoredMemory> = self.episodic.iter().filter(fresh).collect();
        if !episodic.is_empty() {
            lines.push("Recent experiences:".to_string());
            lines.extend(episodic.iter().map(|r| {
                format!(
                    "- {} ({})",
                    r.memory.content,
                    relative_time(r.memory.created_at, now)
                )
            }));
            lines.push(String::new());
        }

        lines.push("</relevant_memories>".to_string());
        Some(lines.join("\n"))
    }
}

/// Coarse human-readable age
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let days = (now - then).num_days().max(0);
    match days {
        0 => "today".to_string(),
        1 => "yesterday".to_string(),
        2..=13 => format!("{days} days ago"),
        14..=59 => format!("{} weeks ago", days / 7),
        60..=729 => format!("{} months ago", days / 30),
        _ => format!("{} years ago", days / 365),
    }
}

/// Answers queries against the store for one session at a time
#[derive(Clone)]
pub struct RetrievalService {
    store: SqliteStore,
    embedder: Arc<dyn EmbeddingProvider>,
    scoring: ScoringConfig,
    config: RetrievalConfig,
}

impl RetrievalService {
    pub fn new(
        store: SqliteStore,
        embedder: Arc<dyn EmbeddingProvider>,
        scoring: ScoringConfig,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            scoring,
            config,
        }
    }

    /// Rank memories for `text` within `session`
    ///
    /// Fails with [`EmberError::EmbeddingUnavailable`] if the query cannot be
    /// embedded; never degrades to an empty result.
    #[tracing::instrument(skip(self, text, session), fields(session = %session.id()))]
    pub async fn query(&self, text: &str, session: &Session, now: DateTime<Utc>) -> Result<QueryResult> {
        let query_vec = self.embed_query(text).await?;

        let (episodic_pool, factual_pool, mut core) = tokio::try_join!(
            self.store.memories_for_track(Track::Episodic),
            self.store.memories_for_track(Track::Factual),
            self.store.list_core_memories(),
        )?;

        let mut to_promote: Vec<Memory> = Vec::new();
        let (episodic, factual, topic_warmed) = {
            let mut warmth = session.warmth().await;

            let episodic = self.rank_track(
                &query_vec,
                &episodic_pool,
                &warmth,
                now,
                self.config.max_episodic,
                &mut to_promote,
            );
            let factual = self.rank_track(
                &query_vec,
                &factual_pool,
                &warmth,
                now,
                self.config.max_factual,
                &mut to_promote,
            );

            let topic_warmed = warm_results(&mut warmth, &episodic, &factual, &episodic_pool, &factual_pool);
            (episodic, factual, topic_warmed)
        };

        let promoted_cores = promotion::promote(&self.store, &to_promote, now).await?;
        let promoted: Vec<Uuid> = promoted_cores
            .iter()
            .filter_map(|c| c.promoted_from)
            .collect();
        core.extend(promoted_cores);

        debug!(
            episodic = episodic.len(),
            factual = factual.len(),
            core = core.len(),
            promoted = promoted.len(),
            topic_warmed,
            "Query answered"
        );

        Ok(QueryResult {
            episodic,
            factual,
            core,
            promoted,
            topic_warmed,
        })
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let timeout = Duration::from_millis(self.config.embed_timeout_ms);
        match tokio::time::timeout(timeout, self.embedder.embed(text)).await {
            Ok(Ok(v)) if v.is_empty() => Err(EmberError::EmbeddingUnavailable(
                "provider returned an empty vector".to_string(),
            )),
            Ok(Ok(v)) => Ok(v),
            Ok(Err(EmberError::EmbeddingUnavailable(msg))) => {
                Err(EmberError::EmbeddingUnavailable(msg))
            }
            Ok(Err(e)) => Err(EmberError::EmbeddingUnavailable(e.to_string())),
            Err(_) => Err(EmberError::EmbeddingUnavailable(format!(
                "{} timed out after {}ms",
                self.embedder.name(),
                timeout.as_millis()
            ))),
        }
    }

    /// Score, filter, dedup and truncate one track; collects promotion
    /// candidates as a side effect
    fn rank_track(
        &self,
        query_vec: &[f32],
        pool: &[Memory],
        warmth: &WarmthCache,
        now: DateTime<Utc>,
        limit: usize,
        to_promote: &mut Vec<Memory>,
    ) -> Vec<ScoredMemory> {
        let mut scored = Vec::new();
        for memory in pool.iter().filter(|m| !m.is_core()) {
            let score = score_memory(
                query_vec,
                memory,
                now,
                warmth.combined_boost(&memory.id),
                &self.scoring,
            );

            if promotion::qualifies(score.base, self.config.promotion_threshold) {
                to_promote.push(memory.clone());
            }
            if score.final_score >= self.config.relevance_floor {
                scored.push(ScoredMemory {
                    memory: memory.clone(),
                    score,
                });
            }
        }

        let mut ranked = if self.config.dedup_enabled {
            deduplicate(scored, self.config.dedup_threshold)
        } else {
            scored.sort_by(rank_order);
            scored
        };
        ranked.truncate(limit);
        ranked
    }
}

/// Retrieval-warm the returned memories, then topic-warm their neighbours
/// across both tracks
fn warm_results(
    warmth: &mut WarmthCache,
    episodic: &[ScoredMemory],
    factual: &[ScoredMemory],
    episodic_pool: &[Memory],
    factual_pool: &[Memory],
) -> usize {
    let returned: Vec<TopicCandidate<'_>> = episodic
        .iter()
        .chain(factual.iter())
        .map(|r| TopicCandidate {
            id: r.memory.id,
            embedding: &r.memory.embedding,
        })
        .collect();

    for r in &returned {
        warmth.boost_retrieval(r.id);
    }

    let pool: Vec<TopicCandidate<'_>> = episodic_pool
        .iter()
        .chain(factual_pool.iter())
        .map(|m| TopicCandidate {
            id: m.id,
            embedding: &m.embedding,
        })
        .collect();

    warmth.propagate_topic(&returned, &pool)
}
