//! Memory model, scoring, warmth and retrieval

pub mod dedup;
pub mod promotion;
pub mod retrieval;
pub mod scoring;
pub mod session;
pub mod types;
pub mod warmth;

pub use retrieval::{QueryResult, RetrievalService};
pub use scoring::{ScoreBreakdown, ScoredMemory};
pub use session::{Session, SessionId, SessionIdError};
pub use types::{
    ConversationTurn, CoreCategory, CoreMemory, DecayCategory, Memory, MemoryCategory, MemoryKind,
    Role, Track, TurnRange,
};
pub use warmth::{WarmthCache, WarmthEntry, WarmthKind};
