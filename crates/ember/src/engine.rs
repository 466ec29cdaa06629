//! Engine facade
//!
//! Owns the store, the embedding provider, the extraction pipeline and the
//! per-session state (warmth caches and watcher tasks). Everything a host
//! application needs goes through [`MemoryEngine`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::embedding::{EmbeddingProvider, FastEmbedProvider};
use crate::error::Result;
use crate::extraction::{
    CycleOutcome, ExtractionCollaborator, ExtractionPipeline, RemoteExtractor, WatcherHandle,
    spawn_watcher,
};
use crate::memory::retrieval::{QueryResult, RetrievalService};
use crate::memory::session::{Session, SessionId};
use crate::memory::types::{ConversationTurn, CoreCategory, CoreMemory, Role};
use crate::storage::{SqliteStore, StoreStats};

/// Warmth and progress of one open session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: SessionId,
    pub turns_this_run: u64,
    pub warmth_entries: usize,
    pub watching: bool,
}

/// Store counts plus live session state
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub store: StoreStats,
    pub open_sessions: usize,
    pub sessions: Vec<SessionStats>,
}

pub struct MemoryEngine {
    config: Config,
    store: SqliteStore,
    retrieval: RetrievalService,
    pipeline: Arc<ExtractionPipeline>,
    sessions: DashMap<SessionId, Arc<Session>>,
    watchers: DashMap<SessionId, WatcherHandle>,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("pipeline", &self.pipeline)
            .field("sessions", &self.sessions.len())
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

impl MemoryEngine {
    /// Assemble an engine from already-built parts
    pub fn new(
        config: Config,
        store: SqliteStore,
        embedder: Arc<dyn EmbeddingProvider>,
        collaborator: Arc<dyn ExtractionCollaborator>,
    ) -> Self {
        let retrieval = RetrievalService::new(
            store.clone(),
            Arc::clone(&embedder),
            config.scoring.clone(),
            config.retrieval.clone(),
        );
        let pipeline = Arc::new(ExtractionPipeline::new(
            store.clone(),
            embedder,
            collaborator,
            config.extraction.clone(),
        ));

        Self {
            config,
            store,
            retrieval,
            pipeline,
            sessions: DashMap::new(),
            watchers: DashMap::new(),
        }
    }

    /// Open the configured database, load the local embedding model and
    /// connect the remote extractor
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        info!(path = %config.storage.database_path.display(), "Opening memory store");
        let store = SqliteStore::open(&config.storage).await?;

        info!(model = %config.embedding.model, "Initializing embedding model (this may take a moment on first run)");
        let embedder = FastEmbedProvider::new(&config.embedding)?;

        let collaborator = RemoteExtractor::new(&config.extractor, &config.extraction)?;

        Ok(Self::new(
            config,
            store,
            Arc::new(embedder),
            Arc::new(collaborator),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Open a session, or return it if already open
    ///
    /// Reopening a session that ended earlier clears its `ended_at`.
    pub async fn open_session(&self, session_id: &SessionId) -> Result<Arc<Session>> {
        if let Some(existing) = self.session(session_id) {
            return Ok(existing);
        }

        let session = Arc::clone(
            self.sessions
                .entry(session_id.clone())
                .or_insert_with(|| Arc::new(Session::new(session_id.clone(), &self.config.warmth)))
                .value(),
        );
        self.store
            .ensure_session(session_id, session.started_at())
            .await?;

        info!(session = %session_id, "Session opened");
        Ok(session)
    }

    pub fn session(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|s| Arc::clone(s.value()))
    }

    /// Stop the session's watcher, discard its warmth and record the end time
    pub async fn end_session(&self, session_id: &SessionId) -> Result<()> {
        if let Some((_, watcher)) = self.watchers.remove(session_id) {
            watcher.shutdown().await;
        }
        if let Some((_, session)) = self.sessions.remove(session_id) {
            session.clear_warmth().await;
        }
        self.pipeline.forget(session_id);
        self.store.end_session(session_id, Utc::now()).await?;

        info!(session = %session_id, "Session ended");
        Ok(())
    }

    /// Record a turn, advance the session's warmth and nudge its watcher
    pub async fn append_turn(
        &self,
        session_id: &SessionId,
        role: Role,
        content: &str,
    ) -> Result<ConversationTurn> {
        let session = self.open_session(session_id).await?;
        let turn = self
            .store
            .insert_turn(session_id, role, content, Utc::now())
            .await?;
        let count = session.advance_turn().await;
        debug!(session = %session_id, turn_id = turn.id, count, "Turn appended");

        if let Some(watcher) = self.watchers.get(session_id) {
            watcher.nudge();
        }
        Ok(turn)
    }

    /// The most recent unprocessed turns, oldest first
    pub async fn context_window(&self, session_id: &SessionId) -> Result<Vec<ConversationTurn>> {
        self.store
            .recent_unprocessed(session_id, self.config.extraction.context_window_size)
            .await
    }

    // -----------------------------------------------------------------------
    // Retrieval and core memories
    // -----------------------------------------------------------------------

    pub async fn query(
        &self,
        text: &str,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<QueryResult> {
        let session = self.open_session(session_id).await?;
        self.retrieval.query(text, &session, now).await
    }

    pub async fn add_core_memory(
        &self,
        category: CoreCategory,
        content: &str,
    ) -> Result<CoreMemory> {
        self.store.add_core_memory(category, content, Utc::now()).await
    }

    pub async fn list_core_memories(&self) -> Result<Vec<CoreMemory>> {
        self.store.list_core_memories().await
    }

    // -----------------------------------------------------------------------
    // Extraction
    // -----------------------------------------------------------------------

    /// Run one extraction cycle now
    ///
    /// With `force`, turns beyond the context window are extracted even
    /// below the overflow trigger.
    pub async fn run_extraction(&self, session_id: &SessionId, force: bool) -> Result<CycleOutcome> {
        self.pipeline.run_cycle(session_id, force).await
    }

    /// Start the background watcher for a session; no-op if one is running
    pub async fn start_watcher(&self, session_id: &SessionId) -> Result<()> {
        self.open_session(session_id).await?;

        let interval = Duration::from_secs(self.config.extraction.watch_interval_secs.max(1));
        let mut slot = self.watchers.entry(session_id.clone()).or_insert_with(|| {
            spawn_watcher(Arc::clone(&self.pipeline), session_id.clone(), interval)
        });
        if slot.is_finished() {
            *slot = spawn_watcher(Arc::clone(&self.pipeline), session_id.clone(), interval);
        }
        Ok(())
    }

    pub fn is_watching(&self, session_id: &SessionId) -> bool {
        self.watchers
            .get(session_id)
            .is_some_and(|w| !w.is_finished())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub async fn stats(&self) -> Result<EngineStats> {
        let store = self.store.stats().await?;

        let open: Vec<Arc<Session>> = self.sessions.iter().map(|s| Arc::clone(s.value())).collect();
        let mut sessions = Vec::with_capacity(open.len());
        for session in open {
            let warmth_entries = session.warmth().await.len();
            sessions.push(SessionStats {
                session_id: session.id().clone(),
                turns_this_run: session.turn_count(),
                warmth_entries,
                watching: self.is_watching(session.id()),
            });
        }
        sessions.sort_by(|a, b| a.session_id.as_str().cmp(b.session_id.as_str()));

        Ok(EngineStats {
            store,
            open_sessions: sessions.len(),
            sessions,
        })
    }

    /// Stop every watcher, then close the store
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.watchers.iter().map(|w| w.key().clone()).collect();
        let handles: Vec<WatcherHandle> = ids
            .iter()
            .filter_map(|id| self.watchers.remove(id).map(|(_, h)| h))
            .collect();

        info!(watchers = handles.len(), "Shutting down");
        futures::future::join_all(handles.into_iter().map(WatcherHandle::shutdown)).await;

        self.sessions.clear();
        self.store.close().await;
    }
}
