//! Extraction pipeline
//!
//! Per session: WATCHING -> BATCHING -> EXTRACTING -> COMMITTING -> WATCHING.
//! A cycle fires once the unprocessed turn count reaches the overflow
//! trigger, takes the oldest turns as an immutable batch, asks the
//! collaborator for candidates, and commits the resulting memories together
//! with the processed flags in one transaction.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info, warn};

use crate::config::ExtractionConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{EmberError, Result};
use crate::extraction::batch::ExtractionBatch;
use crate::extraction::provider::ExtractionCollaborator;
use crate::extraction::types::{Candidate, RawCandidate, RawExtraction};
use crate::memory::session::SessionId;
use crate::memory::types::{Memory, Track};
use crate::storage::SqliteStore;

/// Where a session's pipeline currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Watching,
    Batching,
    Extracting,
    Committing,
}

/// What was written by a successful commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub turns_processed: usize,
    pub episodic: usize,
    pub factual: usize,
    /// Rated below the importance floor
    pub below_floor: usize,
    pub malformed: usize,
    /// Valid but beyond the per-track cap
    pub over_cap: usize,
}

/// Result of one pipeline cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Not enough unprocessed turns to extract
    BelowTrigger { unprocessed: usize },
    /// Another cycle holds this session's extraction lock
    LockBusy,
    Committed(CommitSummary),
    /// The batch was left untouched and will be retried on a later tick
    Deferred { reason: String },
    /// The batch had already been committed by another run
    Stale,
}

/// Candidates that survived validation, floor and caps
#[derive(Debug, Default)]
struct Selection {
    accepted: Vec<Candidate>,
    below_floor: usize,
    malformed: usize,
    over_cap: usize,
}

pub struct ExtractionPipeline {
    store: SqliteStore,
    embedder: Arc<dyn EmbeddingProvider>,
    collaborator: Arc<dyn ExtractionCollaborator>,
    config: ExtractionConfig,
    locks: DashMap<SessionId, Arc<TokioMutex<()>>>,
    states: DashMap<SessionId, PipelineState>,
}

impl std::fmt::Debug for ExtractionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionPipeline")
            .field("embedder", &self.embedder.name())
            .field("collaborator", &self.collaborator.name())
            .field("config", &self.config)
            .finish()
    }
}

/// Resets the session's state to WATCHING when a cycle ends, however it ends
struct StateGuard<'a> {
    states: &'a DashMap<SessionId, PipelineState>,
    session_id: SessionId,
}

impl StateGuard<'_> {
    fn set(&self, state: PipelineState) {
        debug!(session = %self.session_id, ?state, "Pipeline state");
        self.states.insert(self.session_id.clone(), state);
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.states
            .insert(self.session_id.clone(), PipelineState::Watching);
    }
}

impl ExtractionPipeline {
    pub fn new(
        store: SqliteStore,
        embedder: Arc<dyn EmbeddingProvider>,
        collaborator: Arc<dyn ExtractionCollaborator>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            collaborator,
            config,
            locks: DashMap::new(),
            states: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Current state of a session's pipeline
    pub fn state(&self, session_id: &SessionId) -> PipelineState {
        self.states
            .get(session_id)
            .map(|s| *s.value())
            .unwrap_or(PipelineState::Watching)
    }

    /// Forget a session's lock and state
    ///
    /// A lock still shared with a running or starting cycle is kept, so a
    /// later cycle for the same session still sees it as busy.
    pub fn forget(&self, session_id: &SessionId) {
        // lock_for clones under the shard lock, so a count of one means no cycle holds it
        let removed = self
            .locks
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
        if removed.is_some() {
            self.states.remove(session_id);
        } else if self.locks.contains_key(session_id) {
            debug!(session = %session_id, "Extraction in flight, keeping its lock");
        }
    }

    fn lock_for(&self, session_id: &SessionId) -> Arc<TokioMutex<()>> {
        self.locks
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(TokioMutex::new(())))
            .value()
            .clone()
    }

    /// Run one cycle for a session
    ///
    /// With `force`, extraction also runs below the overflow trigger as long
    /// as more turns than the context window are unprocessed; the batch never
    /// reaches into the context window.
    #[tracing::instrument(skip(self, session_id), fields(session = %session_id))]
    pub async fn run_cycle(&self, session_id: &SessionId, force: bool) -> Result<CycleOutcome> {
        // count under the lock; a cycle that just committed must be visible
        let lock = self.lock_for(session_id);
        let Ok(_lock_guard) = lock.try_lock_owned() else {
            debug!("Extraction already running, skipping trigger");
            return Ok(CycleOutcome::LockBusy);
        };

        let unprocessed = self.store.unprocessed_count(session_id).await?;
        let window = self.config.context_window_size;

        let take = if unprocessed >= self.config.overflow_trigger {
            self.config.batch_size
        } else if force && unprocessed > window {
            self.config.batch_size.min(unprocessed - window)
        } else {
            return Ok(CycleOutcome::BelowTrigger { unprocessed });
        };

        let state = StateGuard {
            states: &self.states,
            session_id: session_id.clone(),
        };

        state.set(PipelineState::Batching);
        let turns = self.store.oldest_unprocessed(session_id, take).await?;
        let Some(batch) = ExtractionBatch::new(session_id.clone(), turns) else {
            return Ok(CycleOutcome::BelowTrigger { unprocessed: 0 });
        };
        info!(turns = batch.len(), unprocessed, "Extracting batch");

        state.set(PipelineState::Extracting);
        let raw = match self.extract_with_retry(&batch).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Extraction deferred, batch left unprocessed");
                return Ok(CycleOutcome::Deferred {
                    reason: e.to_string(),
                });
            }
        };

        state.set(PipelineState::Committing);
        let selection = self.select_candidates(raw);
        let now = Utc::now();
        let memories = match self.build_memories(&batch, &selection.accepted, now).await {
            Ok(memories) => memories,
            Err(e) => {
                warn!(error = %e, "Embedding failed, batch left unprocessed");
                return Ok(CycleOutcome::Deferred {
                    reason: e.to_string(),
                });
            }
        };

        match self
            .store
            .commit_extraction(&batch.turn_ids(), &memories, now)
            .await
        {
            Ok(_) => {}
            Err(EmberError::StaleBatch(reason)) => {
                warn!(%reason, "Batch already committed, rolled back");
                return Ok(CycleOutcome::Stale);
            }
            Err(e) => return Err(e),
        }

        let summary = CommitSummary {
            turns_processed: batch.len(),
            episodic: memories.iter().filter(|m| m.track == Track::Episodic).count(),
            factual: memories.iter().filter(|m| m.track == Track::Factual).count(),
            below_floor: selection.below_floor,
            malformed: selection.malformed,
            over_cap: selection.over_cap,
        };
        info!(
            turns = summary.turns_processed,
            episodic = summary.episodic,
            factual = summary.factual,
            skipped = summary.below_floor + summary.malformed + summary.over_cap,
            "Extraction committed"
        );
        Ok(CycleOutcome::Committed(summary))
    }

    /// Call the collaborator with a timeout, retrying with exponential backoff
    async fn extract_with_retry(&self, batch: &ExtractionBatch) -> Result<RawExtraction> {
        let text = batch.to_prompt_text(&self.config.user_name, &self.config.assistant_name);
        let timeout = Duration::from_millis(self.config.collaborator_timeout_ms);
        let attempts = self.config.max_retries + 1;
        let mut delay = Duration::from_millis(self.config.initial_backoff_ms);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let call = self.collaborator.extract(&text, &self.config.user_name);
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(raw)) => return Ok(raw),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("timed out after {}ms", timeout.as_millis()),
            }

            if attempt < attempts {
                warn!(
                    collaborator = self.collaborator.name(),
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Extraction call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(EmberError::ExtractionFailed(format!(
            "{} failed after {} attempts: {}",
            self.collaborator.name(),
            attempts,
            last_error
        )))
    }

    /// Validate, apply the importance floor, and cap each track
    fn select_candidates(&self, raw: RawExtraction) -> Selection {
        let mut selection = Selection::default();

        for (track, raws, cap) in [
            (Track::Episodic, raw.episodic, self.config.max_episodic),
            (Track::Factual, raw.factual, self.config.max_factual),
        ] {
            let mut kept = 0usize;
            for raw in &raws {
                match self.accept(track, raw) {
                    Ok(Some(candidate)) if kept < cap => {
                        kept += 1;
                        selection.accepted.push(candidate);
                    }
                    Ok(Some(_)) => selection.over_cap += 1,
                    Ok(None) => selection.below_floor += 1,
                    Err(e) => {
                        warn!(%track, error = %e, "Skipping malformed candidate");
                        selection.malformed += 1;
                    }
                }
            }
        }

        selection
    }

    fn accept(&self, track: Track, raw: &RawCandidate) -> Result<Option<Candidate>> {
        let candidate = Candidate::validate(track, raw)?;
        if candidate.rating < self.config.importance_floor {
            debug!(rating = candidate.rating, "Candidate below importance floor");
            return Ok(None);
        }
        Ok(Some(candidate))
    }

    /// Embed every accepted candidate; any failure or timeout aborts the
    /// whole batch
    async fn build_memories(
        &self,
        batch: &ExtractionBatch,
        candidates: &[Candidate],
        now: DateTime<Utc>,
    ) -> Result<Vec<Memory>> {
        let timeout = Duration::from_millis(self.config.embed_timeout_ms);
        let mut memories = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let embedding = tokio::time::timeout(timeout, self.embedder.embed(&candidate.content))
                .await
                .map_err(|_| {
                    EmberError::EmbeddingUnavailable(format!(
                        "{} timed out after {}ms",
                        self.embedder.name(),
                        timeout.as_millis()
                    ))
                })??;
            let mut memory = Memory::new(
                candidate.track,
                candidate.kind,
                candidate.content.clone(),
                embedding,
                candidate.importance(),
            );
            memory.session_id = Some(batch.session_id().clone());
            memory.source_turns = batch.range();
            memory.created_at = now;
            memories.push(memory);
        }
        Ok(memories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::Role;
    use crate::testing::{HashEmbedder, ScriptedExtractor};

    fn fast_config() -> ExtractionConfig {
        ExtractionConfig {
            initial_backoff_ms: 1,
            collaborator_timeout_ms: 5_000,
            ..ExtractionConfig::default()
        }
    }

    async fn setup(
        extractor: ScriptedExtractor,
        config: ExtractionConfig,
    ) -> (ExtractionPipeline, SqliteStore, SessionId) {
        let store = SqliteStore::in_memory().await.unwrap();
        let pipeline = ExtractionPipeline::new(
            store.clone(),
            Arc::new(HashEmbedder::new()),
            Arc::new(extractor),
            config,
        );
        (pipeline, store, SessionId::try_from("session-1").unwrap())
    }

    async fn append_turns(store: &SqliteStore, session: &SessionId, n: usize) {
        let start = Utc::now() - chrono::Duration::hours(1);
        for i in 0..n {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store
                .insert_turn(
                    session,
                    role,
                    &format!("turn number {i}"),
                    start + chrono::Duration::seconds(i as i64),
                )
                .await
                .unwrap();
        }
    }

    fn sample_extraction() -> RawExtraction {
        RawExtraction {
            episodic: vec![RawCandidate::new(
                "I talked with Sam about moving to Lisbon",
                "6",
                "event",
            )],
            factual: vec![
                RawCandidate::new("Sam lives in Lisbon", "8", "fact"),
                RawCandidate::new("Sam had coffee", "2", "fact"),
                RawCandidate::new("Sam likes", "five", "preference"),
            ],
        }
    }

    #[tokio::test]
    async fn test_below_trigger_does_nothing() {
        let (pipeline, store, session) =
            setup(ScriptedExtractor::always(sample_extraction()), fast_config()).await;
        append_turns(&store, &session, 39).await;

        let outcome = pipeline.run_cycle(&session, false).await.unwrap();
        assert_eq!(outcome, CycleOutcome::BelowTrigger { unprocessed: 39 });
        assert_eq!(store.unprocessed_count(&session).await.unwrap(), 39);
    }

    #[tokio::test]
    async fn test_overflow_commits_oldest_batch() {
        let extractor = ScriptedExtractor::always(sample_extraction());
        let calls = extractor.calls();
        let (pipeline, store, session) = setup(extractor, fast_config()).await;
        append_turns(&store, &session, 40).await;

        let outcome = pipeline.run_cycle(&session, false).await.unwrap();
        let CycleOutcome::Committed(summary) = outcome else {
            panic!("expected commit, got {outcome:?}");
        };

        assert_eq!(summary.turns_processed, 10);
        assert_eq!(summary.episodic, 1);
        assert_eq!(summary.factual, 1);
        assert_eq!(summary.below_floor, 1);
        assert_eq!(summary.malformed, 1);
        assert_eq!(store.unprocessed_count(&session).await.unwrap(), 30);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        // the oldest ten were consumed
        let next = store.oldest_unprocessed(&session, 1).await.unwrap();
        assert_eq!(next[0].content, "turn number 10");
        assert_eq!(pipeline.state(&session), PipelineState::Watching);
    }

    #[tokio::test]
    async fn test_committed_memories_carry_provenance() {
        let (pipeline, store, session) =
            setup(ScriptedExtractor::always(sample_extraction()), fast_config()).await;
        append_turns(&store, &session, 40).await;
        pipeline.run_cycle(&session, false).await.unwrap();

        let facts = store.memories_for_track(Track::Factual).await.unwrap();
        assert_eq!(facts.len(), 1);
        let fact = &facts[0];
        assert!((fact.importance - 0.8).abs() < 1e-6);
        assert_eq!(fact.decay_category, crate::memory::types::DecayCategory::Permanent);
        assert_eq!(fact.session_id.as_ref(), Some(&session));
        let range = fact.source_turns.unwrap();
        assert_eq!(range.last - range.first, 9);
    }

    #[tokio::test]
    async fn test_collaborator_failure_defers_and_leaves_turns() {
        let extractor = ScriptedExtractor::failing();
        let calls = extractor.calls();
        let config = ExtractionConfig {
            max_retries: 2,
            ..fast_config()
        };
        let (pipeline, store, session) = setup(extractor, config).await;
        append_turns(&store, &session, 40).await;

        let outcome = pipeline.run_cycle(&session, false).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Deferred { .. }));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(store.unprocessed_count(&session).await.unwrap(), 40);
        assert_eq!(store.stats().await.unwrap().factual_memories, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let extractor = ScriptedExtractor::fail_then(1, sample_extraction());
        let (pipeline, store, session) = setup(extractor, fast_config()).await;
        append_turns(&store, &session, 40).await;

        let outcome = pipeline.run_cycle(&session, false).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Committed(_)));
    }

    #[tokio::test]
    async fn test_lock_contention_skips_cycle() {
        let (pipeline, store, session) =
            setup(ScriptedExtractor::always(sample_extraction()), fast_config()).await;
        append_turns(&store, &session, 40).await;

        let lock = pipeline.lock_for(&session);
        let _held = lock.try_lock_owned().unwrap();

        let outcome = pipeline.run_cycle(&session, false).await.unwrap();
        assert_eq!(outcome, CycleOutcome::LockBusy);
        assert_eq!(store.unprocessed_count(&session).await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_force_respects_context_window() {
        let (pipeline, store, session) =
            setup(ScriptedExtractor::always(RawExtraction::default()), fast_config()).await;
        append_turns(&store, &session, 34).await;

        let outcome = pipeline.run_cycle(&session, true).await.unwrap();
        let CycleOutcome::Committed(summary) = outcome else {
            panic!("expected commit, got {outcome:?}");
        };
        assert_eq!(summary.turns_processed, 4);
        assert_eq!(store.unprocessed_count(&session).await.unwrap(), 30);

        let again = pipeline.run_cycle(&session, true).await.unwrap();
        assert_eq!(again, CycleOutcome::BelowTrigger { unprocessed: 30 });
    }

    #[tokio::test]
    async fn test_per_track_caps() {
        let many = RawExtraction {
            episodic: (0..9)
                .map(|i| RawCandidate::new(format!("I remember episode number {i}"), "5", "event"))
                .collect(),
            factual: (0..10)
                .map(|i| RawCandidate::new(format!("Sam fact {i}"), "5", "fact"))
                .collect(),
        };
        let (pipeline, store, session) =
            setup(ScriptedExtractor::always(many), fast_config()).await;
        append_turns(&store, &session, 40).await;

        let CycleOutcome::Committed(summary) = pipeline.run_cycle(&session, false).await.unwrap()
        else {
            panic!("expected commit");
        };
        assert_eq!(summary.episodic, 6);
        assert_eq!(summary.factual, 8);
        assert_eq!(summary.over_cap, 5);
    }

    #[tokio::test]
    async fn test_embedding_failure_commits_nothing() {
        let store = SqliteStore::in_memory().await.unwrap();
        let pipeline = ExtractionPipeline::new(
            store.clone(),
            Arc::new(crate::testing::FailingEmbedder),
            Arc::new(ScriptedExtractor::always(sample_extraction())),
            fast_config(),
        );
        let session = SessionId::try_from("s").unwrap();
        append_turns(&store, &session, 40).await;

        let outcome = pipeline.run_cycle(&session, false).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Deferred { .. }));
        assert_eq!(store.unprocessed_count(&session).await.unwrap(), 40);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.episodic_memories + stats.factual_memories, 0);
    }

    #[tokio::test]
    async fn test_collaborator_timeout_defers_batch() {
        let extractor = ScriptedExtractor::always(sample_extraction())
            .with_delay(Duration::from_secs(30));
        let calls = extractor.calls();
        let config = ExtractionConfig {
            collaborator_timeout_ms: 20,
            max_retries: 1,
            ..fast_config()
        };
        let (pipeline, store, session) = setup(extractor, config).await;
        append_turns(&store, &session, 40).await;

        let outcome = pipeline.run_cycle(&session, false).await.unwrap();
        let CycleOutcome::Deferred { reason } = outcome else {
            panic!("expected deferral, got {outcome:?}");
        };
        assert!(reason.contains("timed out"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(store.unprocessed_count(&session).await.unwrap(), 40);
        assert_eq!(pipeline.state(&session), PipelineState::Watching);
    }

    #[tokio::test]
    async fn test_stalled_embedder_defers_batch() {
        let store = SqliteStore::in_memory().await.unwrap();
        let config = ExtractionConfig {
            embed_timeout_ms: 20,
            ..fast_config()
        };
        let pipeline = ExtractionPipeline::new(
            store.clone(),
            Arc::new(crate::testing::HangingEmbedder),
            Arc::new(ScriptedExtractor::always(sample_extraction())),
            config,
        );
        let session = SessionId::try_from("s").unwrap();
        append_turns(&store, &session, 40).await;

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.run_cycle(&session, false),
        )
        .await
        .unwrap()
        .unwrap();
        let CycleOutcome::Deferred { reason } = outcome else {
            panic!("expected deferral, got {outcome:?}");
        };
        assert!(reason.contains("timed out"));
        assert_eq!(store.unprocessed_count(&session).await.unwrap(), 40);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.episodic_memories + stats.factual_memories, 0);
    }

    #[tokio::test]
    async fn test_forget_keeps_lock_of_running_cycle() {
        let extractor = ScriptedExtractor::always(sample_extraction())
            .with_delay(Duration::from_millis(300));
        let calls = extractor.calls();
        let (pipeline, store, session) = setup(extractor, fast_config()).await;
        append_turns(&store, &session, 40).await;
        let pipeline = Arc::new(pipeline);

        let running = {
            let pipeline = Arc::clone(&pipeline);
            let session = session.clone();
            tokio::spawn(async move { pipeline.run_cycle(&session, false).await })
        };
        while pipeline.state(&session) != PipelineState::Extracting {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        pipeline.forget(&session);
        let second = pipeline.run_cycle(&session, false).await.unwrap();
        assert_eq!(second, CycleOutcome::LockBusy);

        let first = running.await.unwrap().unwrap();
        assert!(matches!(first, CycleOutcome::Committed(_)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(store.unprocessed_count(&session).await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_forget_idle_session_drops_lock() {
        let (pipeline, _store, session) =
            setup(ScriptedExtractor::always(RawExtraction::default()), fast_config()).await;
        drop(pipeline.lock_for(&session));

        pipeline.forget(&session);
        assert!(!pipeline.locks.contains_key(&session));
    }
}
