//! Memory types for the Ember engine
//!
//! Defines persisted records (turns, memories, core memories) and the
//! classification enums attached to them. Every enum round-trips through
//! its lowercase string form, which is also how it is stored in SQLite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::memory::session::SessionId;

/// Retrieval track a memory belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    /// What happened: events, reflections, observations
    Episodic,
    /// What is known: facts and preferences
    Factual,
}

impl Track {
    pub fn as_str(&self) -> &'static str {
        match self {
            Track::Episodic => "episodic",
            Track::Factual => "factual",
        }
    }
}

impl FromStr for Track {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "episodic" => Ok(Track::Episodic),
            "factual" => Ok(Track::Factual),
            other => Err(format!("unknown track: {other}")),
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How fast a memory's freshness fades
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecayCategory {
    /// Never decays
    Permanent,
    /// 30-day half-life by default
    Standard,
    /// 7-day half-life by default
    Ephemeral,
}

impl DecayCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecayCategory::Permanent => "permanent",
            DecayCategory::Standard => "standard",
            DecayCategory::Ephemeral => "ephemeral",
        }
    }

    /// Assign a decay category from normalized importance
    ///
    /// `>= 0.8` is permanent, `< 0.4` is ephemeral, anything between is standard.
    pub fn from_importance(importance: f32) -> Self {
        if importance >= 0.8 {
            DecayCategory::Permanent
        } else if importance < 0.4 {
            DecayCategory::Ephemeral
        } else {
            DecayCategory::Standard
        }
    }
}

impl FromStr for DecayCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "permanent" => Ok(DecayCategory::Permanent),
            "standard" => Ok(DecayCategory::Standard),
            "ephemeral" => Ok(DecayCategory::Ephemeral),
            other => Err(format!("unknown decay category: {other}")),
        }
    }
}

impl fmt::Display for DecayCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a memory is still scored or has been promoted to core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Regular,
    Core,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Regular => "regular",
            MemoryCategory::Core => "core",
        }
    }
}

impl FromStr for MemoryCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(MemoryCategory::Regular),
            "core" => Ok(MemoryCategory::Core),
            other => Err(format!("unknown memory category: {other}")),
        }
    }
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type label the extraction collaborator attaches to a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Fact,
    Preference,
    Event,
    Reflection,
    Observation,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Fact => "fact",
            MemoryKind::Preference => "preference",
            MemoryKind::Event => "event",
            MemoryKind::Reflection => "reflection",
            MemoryKind::Observation => "observation",
        }
    }

    /// Whether this label is accepted on the given track
    ///
    /// The factual track only carries facts and preferences.
    pub fn allowed_on(&self, track: Track) -> bool {
        match track {
            Track::Episodic => true,
            Track::Factual => matches!(self, MemoryKind::Fact | MemoryKind::Preference),
        }
    }
}

impl FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fact" => Ok(MemoryKind::Fact),
            "preference" => Ok(MemoryKind::Preference),
            "event" => Ok(MemoryKind::Event),
            "reflection" => Ok(MemoryKind::Reflection),
            "observation" => Ok(MemoryKind::Observation),
            other => Err(format!("unknown memory type: {other}")),
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a core memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreCategory {
    Identity,
    Relationship,
    Preference,
    Fact,
    Narrative,
}

impl CoreCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoreCategory::Identity => "identity",
            CoreCategory::Relationship => "relationship",
            CoreCategory::Preference => "preference",
            CoreCategory::Fact => "fact",
            CoreCategory::Narrative => "narrative",
        }
    }

    /// Category a promoted memory lands in
    pub fn for_promoted(kind: MemoryKind) -> Self {
        match kind {
            MemoryKind::Preference => CoreCategory::Preference,
            MemoryKind::Fact => CoreCategory::Fact,
            MemoryKind::Event | MemoryKind::Reflection | MemoryKind::Observation => {
                CoreCategory::Narrative
            }
        }
    }
}

impl FromStr for CoreCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identity" => Ok(CoreCategory::Identity),
            "relationship" => Ok(CoreCategory::Relationship),
            "preference" => Ok(CoreCategory::Preference),
            "fact" => Ok(CoreCategory::Fact),
            "narrative" => Ok(CoreCategory::Narrative),
            other => Err(format!("unknown core memory category: {other}")),
        }
    }
}

impl fmt::Display for CoreCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive range of turn ids a memory was extracted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRange {
    pub first: i64,
    pub last: i64,
}

/// A single conversational turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Monotonic row id
    pub id: i64,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, by the extraction commit that consumed this turn
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

/// A scored, decaying memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub track: Track,
    pub content: String,
    /// Embedding of `content` (384 dimensions by default)
    pub embedding: Vec<f32>,
    /// Normalized importance in [0, 1]
    pub importance: f32,
    pub decay_category: DecayCategory,
    pub kind: MemoryKind,
    pub category: MemoryCategory,
    /// Session the memory was extracted from, None for manual inserts
    pub session_id: Option<SessionId>,
    pub source_turns: Option<TurnRange>,
    pub created_at: DateTime<Utc>,
    pub promoted_at: Option<DateTime<Utc>>,
}

impl Memory {
    /// Create a regular memory with importance clamped to [0, 1] and the
    /// decay category derived from it
    pub fn new(
        track: Track,
        kind: MemoryKind,
        content: String,
        embedding: Vec<f32>,
        importance: f32,
    ) -> Self {
        let importance = importance.clamp(0.0, 1.0);
        Self {
            id: Uuid::new_v4(),
            track,
            content,
            embedding,
            importance,
            decay_category: DecayCategory::from_importance(importance),
            kind,
            category: MemoryCategory::Regular,
            session_id: None,
            source_turns: None,
            created_at: Utc::now(),
            promoted_at: None,
        }
    }

    pub fn is_core(&self) -> bool {
        self.category == MemoryCategory::Core
    }
}

/// A permanent memory included in every query result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreMemory {
    pub id: Uuid,
    pub content: String,
    pub category: CoreCategory,
    pub created_at: DateTime<Utc>,
    /// Regular memory this was promoted from, None for manual inserts
    pub promoted_from: Option<Uuid>,
}
