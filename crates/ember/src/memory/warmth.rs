//! Session-scoped warmth
//!
//! Memories that were just retrieved, or that sit close to something just
//! retrieved, get a transient score boost that fades turn by turn. Each
//! session owns one `WarmthCache`; nothing here is persisted.
//!
//! The table is an LRU cache so a long session cannot grow it without
//! bound; the least recently boosted entry is evicted first.

use lru::LruCache;
use std::num::NonZeroUsize;
use uuid::Uuid;

use crate::config::WarmthConfig;
use crate::memory::scoring::cosine_similarity;

/// Fallback capacity when the configured one is zero
pub const DEFAULT_WARMTH_CAPACITY: usize = 1000;

/// The two kinds of warmth a memory can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmthKind {
    /// The memory itself was returned by a query
    Retrieval,
    /// The memory is similar to one that was returned
    Topic,
}

/// Current boosts for one memory
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WarmthEntry {
    pub retrieval: f32,
    pub topic: f32,
}

impl WarmthEntry {
    pub fn total(&self) -> f32 {
        self.retrieval + self.topic
    }
}

/// A candidate for topic propagation: id plus embedding
#[derive(Debug, Clone, Copy)]
pub struct TopicCandidate<'a> {
    pub id: Uuid,
    pub embedding: &'a [f32],
}

#[derive(Debug)]
pub struct WarmthCache {
    config: WarmthConfig,
    entries: LruCache<Uuid, WarmthEntry>,
}

impl WarmthCache {
    pub fn new(config: WarmthConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_entries)
            .or_else(|| NonZeroUsize::new(DEFAULT_WARMTH_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            entries: LruCache::new(cap),
        }
    }

    /// Add the retrieval boost to a memory
    pub fn boost_retrieval(&mut self, id: Uuid) {
        self.boost(id, WarmthKind::Retrieval);
    }

    /// Add the topic boost to a memory
    pub fn boost_topic(&mut self, id: Uuid) {
        self.boost(id, WarmthKind::Topic);
    }

    /// Add one boost of `kind`, creating a zeroed entry for unknown ids.
    /// The entry's combined warmth never exceeds the cap.
    pub fn boost(&mut self, id: Uuid, kind: WarmthKind) {
        let cap = self.config.cap;
        let boost = self.boost_amount(kind);

        if !self.entries.contains(&id) {
            self.entries.put(id, WarmthEntry::default());
        }

        if let Some(entry) = self.entries.get_mut(&id) {
            match kind {
                WarmthKind::Retrieval => {
                    let room = (cap - entry.topic).max(0.0);
                    entry.retrieval = (entry.retrieval + boost).min(room);
                }
                WarmthKind::Topic => {
                    let room = (cap - entry.retrieval).max(0.0);
                    entry.topic = (entry.topic + boost).min(room);
                }
            }
        }
    }

    /// Combined warmth for a memory, 0 if it has none
    ///
    /// Does not touch recency.
    pub fn combined_boost(&self, id: &Uuid) -> f32 {
        self.entries
            .peek(id)
            .map(|e| e.total().min(self.config.cap))
            .unwrap_or(0.0)
    }

    pub fn entry(&self, id: &Uuid) -> Option<WarmthEntry> {
        self.entries.peek(id).copied()
    }

    /// Decay every entry one turn and drop the ones that faded out
    pub fn advance_turn(&mut self) {
        if self.entries.is_empty() {
            return;
        }

        let retrieval_decay = self.config.retrieval_decay;
        let topic_decay = self.config.topic_decay;
        let threshold = self.config.prune_threshold;

        let mut faded = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            entry.retrieval *= retrieval_decay;
            entry.topic *= topic_decay;
            if entry.total() < threshold {
                faded.push(*id);
            }
        }

        for id in faded {
            self.entries.pop(&id);
        }
    }

    /// Topic-warm memories similar to the ones just retrieved
    ///
    /// Every candidate (other than the retrieved memories themselves) whose
    /// cosine similarity to any retrieved memory exceeds the configured
    /// threshold receives a topic boost. The most similar candidates win when
    /// more than `topic_max_expansion` qualify. Returns how many were warmed.
    pub fn propagate_topic(
        &mut self,
        retrieved: &[TopicCandidate<'_>],
        pool: &[TopicCandidate<'_>],
    ) -> usize {
        if retrieved.is_empty() || self.config.topic_max_expansion == 0 {
            return 0;
        }

        let threshold = self.config.topic_similarity_threshold;
        let mut related: Vec<(f32, Uuid)> = pool
            .iter()
            .filter(|c| !retrieved.iter().any(|r| r.id == c.id))
            .filter_map(|c| {
                let best = retrieved
                    .iter()
                    .map(|r| cosine_similarity(r.embedding, c.embedding))
                    .fold(f32::MIN, f32::max);
                (best > threshold).then_some((best, c.id))
            })
            .collect();

        related.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        related.truncate(self.config.topic_max_expansion);

        for (_, id) in &related {
            self.boost_topic(*id);
        }
        related.len()
    }

    /// Drop all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    fn boost_amount(&self, kind: WarmthKind) -> f32 {
        match kind {
            WarmthKind::Retrieval => self.config.retrieval_boost,
            WarmthKind::Topic => self.config.topic_boost,
        }
    }
}

impl Default for WarmthCache {
    fn default() -> Self {
        Self::new(WarmthConfig::default())
    }
}
