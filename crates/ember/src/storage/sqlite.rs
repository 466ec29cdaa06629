//! SQLite-backed memory store
//!
//! Raw sqlx queries with private row types mapping SQLite rows into domain
//! records. Reads go through the reader pool, writes through the single
//! writer connection with bounded retry on lock contention. Every
//! multi-statement write runs in one transaction.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use crate::config::{StorageConfig, WriteRetryConfig};
use crate::error::{EmberError, Result};
use crate::memory::session::SessionId;
use crate::memory::types::{
    ConversationTurn, CoreCategory, CoreMemory, Memory, MemoryCategory, Role, Track, TurnRange,
};

use super::pool::DatabasePool;
use super::retry::{WriteFailure, with_write_retry};

/// Row counts across the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub sessions: i64,
    pub turns: i64,
    pub unprocessed_turns: i64,
    pub episodic_memories: i64,
    pub factual_memories: i64,
    pub core_memories: i64,
    pub promoted_memories: i64,
}

/// Durable storage for sessions, turns, memories and core memories
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DatabasePool,
    retry: WriteRetryConfig,
}

impl SqliteStore {
    /// Open the database configured in `config`
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let pool = DatabasePool::open(&config.database_path, config).await?;
        Ok(Self::new(pool, config.write_retry.clone()))
    }

    /// Fresh private in-memory database with the default retry policy
    pub async fn in_memory() -> Result<Self> {
        let pool = DatabasePool::in_memory().await?;
        Ok(Self::new(pool, WriteRetryConfig::default()))
    }

    pub fn new(pool: DatabasePool, retry: WriteRetryConfig) -> Self {
        Self { pool, retry }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // -----------------------------------------------------------------------
    // Sessions and turns
    // -----------------------------------------------------------------------

    /// Record a session, keeping the original start time if it already exists
    pub async fn ensure_session(&self, id: &SessionId, started_at: DateTime<Utc>) -> Result<()> {
        with_write_retry(&self.retry, "ensure_session", move || {
            self.ensure_session_once(id, started_at)
        })
        .await
    }

    async fn ensure_session_once(
        &self,
        id: &SessionId,
        started_at: DateTime<Utc>,
    ) -> std::result::Result<(), WriteFailure> {
        sqlx::query(
            "INSERT INTO sessions (id, started_at) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET ended_at = NULL",
        )
        .bind(id.as_str())
        .bind(format_datetime(&started_at))
        .execute(&self.pool.writer)
        .await?;
        Ok(())
    }

    pub async fn end_session(&self, id: &SessionId, ended_at: DateTime<Utc>) -> Result<()> {
        with_write_retry(&self.retry, "end_session", move || {
            self.end_session_once(id, ended_at)
        })
        .await
    }

    async fn end_session_once(
        &self,
        id: &SessionId,
        ended_at: DateTime<Utc>,
    ) -> std::result::Result<(), WriteFailure> {
        sqlx::query("UPDATE sessions SET ended_at = ? WHERE id = ?")
            .bind(format_datetime(&ended_at))
            .bind(id.as_str())
            .execute(&self.pool.writer)
            .await?;
        Ok(())
    }

    /// Append a turn, creating the session row if needed
    pub async fn insert_turn(
        &self,
        session_id: &SessionId,
        role: Role,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<ConversationTurn> {
        let id = with_write_retry(&self.retry, "insert_turn", move || {
            self.insert_turn_once(session_id, role, content, created_at)
        })
        .await?;

        Ok(ConversationTurn {
            id,
            session_id: session_id.clone(),
            role,
            content: content.to_string(),
            created_at,
            processed: false,
            processed_at: None,
        })
    }

    async fn insert_turn_once(
        &self,
        session_id: &SessionId,
        role: Role,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> std::result::Result<i64, WriteFailure> {
        let created = format_datetime(&created_at);
        let mut tx = self.pool.writer.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO sessions (id, started_at) VALUES (?, ?)")
            .bind(session_id.as_str())
            .bind(&created)
            .execute(&mut *tx)
            .await?;

        let id = sqlx::query(
            "INSERT INTO conversation_turns (session_id, role, content, created_at, processed)
             VALUES (?, ?, ?, ?, 0)",
        )
        .bind(session_id.as_str())
        .bind(role.as_str())
        .bind(content)
        .bind(&created)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query("UPDATE sessions SET turn_count = turn_count + 1 WHERE id = ?")
            .bind(session_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Number of turns in a session not yet consumed by extraction
    pub async fn unprocessed_count(&self, session_id: &SessionId) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM conversation_turns WHERE session_id = ? AND processed = 0",
        )
        .bind(session_id.as_str())
        .fetch_one(&self.pool.reader)
        .await?;
        Ok(count.max(0) as usize)
    }

    /// The oldest `limit` unprocessed turns, in creation order
    pub async fn oldest_unprocessed(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, created_at, processed, processed_at
             FROM conversation_turns
             WHERE session_id = ? AND processed = 0
             ORDER BY created_at ASC, id ASC
             LIMIT ?",
        )
        .bind(session_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await?;

        rows.iter()
            .map(|r| TurnRow::from_row(r)?.into_turn())
            .collect()
    }

    /// The most recent `limit` unprocessed turns, oldest first
    pub async fn recent_unprocessed(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, created_at, processed, processed_at
             FROM conversation_turns
             WHERE session_id = ? AND processed = 0
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(session_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await?;

        let mut turns = rows
            .iter()
            .map(|r| TurnRow::from_row(r)?.into_turn())
            .collect::<Result<Vec<_>>>()?;
        turns.reverse();
        Ok(turns)
    }

    pub async fn get_turn(&self, id: i64) -> Result<Option<ConversationTurn>> {
        let row = sqlx::query(
            "SELECT id, session_id, role, content, created_at, processed, processed_at
             FROM conversation_turns WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool.reader)
        .await?;

        row.map(|r| TurnRow::from_row(&r)?.into_turn()).transpose()
    }

    // -----------------------------------------------------------------------
    // Memories
    // -----------------------------------------------------------------------

    /// All regular (non-core) memories on a track
    pub async fn memories_for_track(&self, track: Track) -> Result<Vec<Memory>> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE track = ? AND category = 'regular'
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(track.as_str())
        .fetch_all(&self.pool.reader)
        .await?;

        rows.iter()
            .map(|r| MemoryRow::from_row(r)?.into_memory())
            .collect()
    }

    /// Most recent memories of any category, optionally restricted to a track
    pub async fn list_memories(&self, track: Option<Track>, limit: usize) -> Result<Vec<Memory>> {
        let rows = match track {
            Some(track) => {
                sqlx::query(&format!(
                    "SELECT {MEMORY_COLUMNS} FROM memories WHERE track = ?
                     ORDER BY created_at DESC, id DESC LIMIT ?"
                ))
                .bind(track.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool.reader)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {MEMORY_COLUMNS} FROM memories
                     ORDER BY created_at DESC, id DESC LIMIT ?"
                ))
                .bind(limit as i64)
                .fetch_all(&self.pool.reader)
                .await?
            }
        };

        rows.iter()
            .map(|r| MemoryRow::from_row(r)?.into_memory())
            .collect()
    }

    pub async fn get_memory(&self, id: &Uuid) -> Result<Option<Memory>> {
        let row = sqlx::query(&format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await?;

        row.map(|r| MemoryRow::from_row(&r)?.into_memory())
            .transpose()
    }

    /// Insert a single memory outside of an extraction batch
    pub async fn insert_memory(&self, memory: &Memory) -> Result<()> {
        with_write_retry(&self.retry, "insert_memory", move || {
            self.insert_memory_once(memory)
        })
        .await
    }

    async fn insert_memory_once(&self, memory: &Memory) -> std::result::Result<(), WriteFailure> {
        let mut tx = self.pool.writer.begin().await?;
        if let Some(session_id) = &memory.session_id {
            sqlx::query("INSERT OR IGNORE INTO sessions (id, started_at) VALUES (?, ?)")
                .bind(session_id.as_str())
                .bind(format_datetime(&memory.created_at))
                .execute(&mut *tx)
                .await?;
        }
        insert_memory_row(&mut tx, memory).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Persist extracted memories and mark their source turns processed,
    /// all or nothing
    ///
    /// Fails with [`EmberError::StaleBatch`] (and writes nothing) when any
    /// batch turn was already processed.
    pub async fn commit_extraction(
        &self,
        turn_ids: &[i64],
        memories: &[Memory],
        processed_at: DateTime<Utc>,
    ) -> Result<usize> {
        with_write_retry(&self.retry, "commit_extraction", move || {
            self.commit_extraction_once(turn_ids, memories, processed_at)
        })
        .await
    }

    async fn commit_extraction_once(
        &self,
        turn_ids: &[i64],
        memories: &[Memory],
        processed_at: DateTime<Utc>,
    ) -> std::result::Result<usize, WriteFailure> {
        let processed = format_datetime(&processed_at);
        let mut tx = self.pool.writer.begin().await?;

        let mut marked = 0u64;
        for id in turn_ids {
            marked += sqlx::query(
                "UPDATE conversation_turns SET processed = 1, processed_at = ?
                 WHERE id = ? AND processed = 0",
            )
            .bind(&processed)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        if marked != turn_ids.len() as u64 {
            // dropping the transaction rolls it back
            return Err(WriteFailure::Abort(EmberError::StaleBatch(format!(
                "{} of {} turns were already processed",
                turn_ids.len() as u64 - marked,
                turn_ids.len()
            ))));
        }

        for memory in memories {
            insert_memory_row(&mut tx, memory).await?;
        }

        tx.commit().await?;
        Ok(memories.len())
    }

    /// Flip a regular memory to core and record its core entry in one
    /// transaction
    ///
    /// Returns `None` when the memory was already promoted or does not exist.
    pub async fn promote_memory(
        &self,
        memory: &Memory,
        category: CoreCategory,
        now: DateTime<Utc>,
    ) -> Result<Option<CoreMemory>> {
        with_write_retry(&self.retry, "promote_memory", move || {
            self.promote_memory_once(memory, category, now)
        })
        .await
    }

    async fn promote_memory_once(
        &self,
        memory: &Memory,
        category: CoreCategory,
        now: DateTime<Utc>,
    ) -> std::result::Result<Option<CoreMemory>, WriteFailure> {
        let promoted_at = format_datetime(&now);
        let mut tx = self.pool.writer.begin().await?;

        let flipped = sqlx::query(
            "UPDATE memories SET category = 'core', decay_category = 'permanent', promoted_at = ?
             WHERE id = ? AND category = 'regular'",
        )
        .bind(&promoted_at)
        .bind(memory.id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if flipped == 0 {
            return Ok(None);
        }

        let core = CoreMemory {
            id: Uuid::new_v4(),
            content: memory.content.clone(),
            category,
            created_at: now,
            promoted_from: Some(memory.id),
        };

        sqlx::query(
            "INSERT INTO core_memories (id, content, category, created_at, promoted_from)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(core.id.to_string())
        .bind(&core.content)
        .bind(core.category.as_str())
        .bind(&promoted_at)
        .bind(memory.id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(core))
    }

    // -----------------------------------------------------------------------
    // Core memories
    // -----------------------------------------------------------------------

    pub async fn add_core_memory(
        &self,
        category: CoreCategory,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<CoreMemory> {
        let core = CoreMemory {
            id: Uuid::new_v4(),
            content: content.to_string(),
            category,
            created_at: now,
            promoted_from: None,
        };
        let record = &core;
        with_write_retry(&self.retry, "add_core_memory", move || {
            self.insert_core_once(record)
        })
        .await?;
        Ok(core)
    }

    async fn insert_core_once(&self, core: &CoreMemory) -> std::result::Result<(), WriteFailure> {
        sqlx::query(
            "INSERT INTO core_memories (id, content, category, created_at, promoted_from)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(core.id.to_string())
        .bind(&core.content)
        .bind(core.category.as_str())
        .bind(format_datetime(&core.created_at))
        .bind(core.promoted_from.map(|id| id.to_string()))
        .execute(&self.pool.writer)
        .await?;
        Ok(())
    }

    /// All core memories, oldest first
    pub async fn list_core_memories(&self) -> Result<Vec<CoreMemory>> {
        let rows = sqlx::query(
            "SELECT id, content, category, created_at, promoted_from
             FROM core_memories ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool.reader)
        .await?;

        rows.iter()
            .map(|r| CoreMemoryRow::from_row(r)?.into_core())
            .collect()
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM sessions) AS sessions,
                (SELECT COUNT(*) FROM conversation_turns) AS turns,
                (SELECT COUNT(*) FROM conversation_turns WHERE processed = 0) AS unprocessed_turns,
                (SELECT COUNT(*) FROM memories WHERE track = 'episodic' AND category = 'regular') AS episodic,
                (SELECT COUNT(*) FROM memories WHERE track = 'factual' AND category = 'regular') AS factual,
                (SELECT COUNT(*) FROM core_memories) AS core,
                (SELECT COUNT(*) FROM memories WHERE category = 'core') AS promoted",
        )
        .fetch_one(&self.pool.reader)
        .await?;

        Ok(StoreStats {
            sessions: row.try_get("sessions")?,
            turns: row.try_get("turns")?,
            unprocessed_turns: row.try_get("unprocessed_turns")?,
            episodic_memories: row.try_get("episodic")?,
            factual_memories: row.try_get("factual")?,
            core_memories: row.try_get("core")?,
            promoted_memories: row.try_get("promoted")?,
        })
    }
}

const MEMORY_COLUMNS: &str = "id, track, content, embedding, importance, decay_category, kind, \
     category, session_id, first_turn_id, last_turn_id, created_at, promoted_at";

async fn insert_memory_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    memory: &Memory,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO memories (id, track, content, embedding, importance, decay_category, kind,
                               category, session_id, first_turn_id, last_turn_id, created_at, promoted_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(memory.id.to_string())
    .bind(memory.track.as_str())
    .bind(&memory.content)
    .bind(encode_embedding(&memory.embedding))
    .bind(f64::from(memory.importance.clamp(0.0, 1.0)))
    .bind(memory.decay_category.as_str())
    .bind(memory.kind.as_str())
    .bind(memory.category.as_str())
    .bind(memory.session_id.as_ref().map(|s| s.as_str()))
    .bind(memory.source_turns.map(|r| r.first))
    .bind(memory.source_turns.map(|r| r.last))
    .bind(format_datetime(&memory.created_at))
    .bind(memory.promoted_at.as_ref().map(format_datetime))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Private row types
// ---------------------------------------------------------------------------

struct TurnRow {
    id: i64,
    session_id: String,
    role: String,
    content: String,
    created_at: String,
    processed: i64,
    processed_at: Option<String>,
}

impl TurnRow {
    fn from_row(row: &SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
            processed: row.try_get("processed")?,
            processed_at: row.try_get("processed_at")?,
        })
    }

    fn into_turn(self) -> Result<ConversationTurn> {
        Ok(ConversationTurn {
            id: self.id,
            session_id: parse_session_id(self.session_id)?,
            role: self.role.parse().map_err(EmberError::Storage)?,
            content: self.content,
            created_at: parse_datetime(&self.created_at)?,
            processed: self.processed != 0,
            processed_at: self.processed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

struct MemoryRow {
    id: String,
    track: String,
    content: String,
    embedding: Vec<u8>,
    importance: f64,
    decay_category: String,
    kind: String,
    category: String,
    session_id: Option<String>,
    first_turn_id: Option<i64>,
    last_turn_id: Option<i64>,
    created_at: String,
    promoted_at: Option<String>,
}

impl MemoryRow {
    fn from_row(row: &SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            track: row.try_get("track")?,
            content: row.try_get("content")?,
            embedding: row.try_get("embedding")?,
            importance: row.try_get("importance")?,
            decay_category: row.try_get("decay_category")?,
            kind: row.try_get("kind")?,
            category: row.try_get("category")?,
            session_id: row.try_get("session_id")?,
            first_turn_id: row.try_get("first_turn_id")?,
            last_turn_id: row.try_get("last_turn_id")?,
            created_at: row.try_get("created_at")?,
            promoted_at: row.try_get("promoted_at")?,
        })
    }

    fn into_memory(self) -> Result<Memory> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| EmberError::Storage(format!("invalid memory id: {e}")))?;
        let source_turns = match (self.first_turn_id, self.last_turn_id) {
            (Some(first), Some(last)) => Some(TurnRange { first, last }),
            _ => None,
        };

        Ok(Memory {
            id,
            track: self.track.parse().map_err(EmberError::Storage)?,
            content: self.content,
            embedding: decode_embedding(&self.embedding)?,
            importance: (self.importance as f32).clamp(0.0, 1.0),
            decay_category: self.decay_category.parse().map_err(EmberError::Storage)?,
            kind: self.kind.parse().map_err(EmberError::Storage)?,
            category: self
                .category
                .parse::<MemoryCategory>()
                .map_err(EmberError::Storage)?,
            session_id: self.session_id.map(parse_session_id).transpose()?,
            source_turns,
            created_at: parse_datetime(&self.created_at)?,
            promoted_at: self.promoted_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

struct CoreMemoryRow {
    id: String,
    content: String,
    category: String,
    created_at: String,
    promoted_from: Option<String>,
}

impl CoreMemoryRow {
    fn from_row(row: &SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            content: row.try_get("content")?,
            category: row.try_get("category")?,
            created_at: row.try_get("created_at")?,
            promoted_from: row.try_get("promoted_from")?,
        })
    }

    fn into_core(self) -> Result<CoreMemory> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| EmberError::Storage(format!("invalid core memory id: {e}")))?;
        let promoted_from = self
            .promoted_from
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|e| EmberError::Storage(format!("invalid promoted_from: {e}")))?;

        Ok(CoreMemory {
            id,
            content: self.content,
            category: self.category.parse().map_err(EmberError::Storage)?,
            created_at: parse_datetime(&self.created_at)?,
            promoted_from,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_session_id(s: String) -> Result<SessionId> {
    SessionId::try_from(s).map_err(|e| EmberError::Storage(format!("invalid session_id: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EmberError::Storage(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Little-endian f32 encoding for embedding BLOBs
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(EmberError::Storage(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
