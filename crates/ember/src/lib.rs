//! Ember - conversational memory engine
//!
//! Turns a stream of conversation turns into scored, decaying memories on
//! two tracks (episodic and factual), and answers queries with the most
//! relevant ones:
//!
//! - a background pipeline batches overflow turns and extracts candidate
//!   memories through an [`extraction::ExtractionCollaborator`]
//! - retrieval blends semantic similarity, importance and freshness, then
//!   adds per-session warmth and collapses near-duplicates
//! - consistently high-scoring memories are promoted to permanent core
//!   memories included in every result

pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod memory;
pub mod storage;
pub mod testing;

pub use engine::{EngineStats, MemoryEngine, SessionStats};
pub use error::{EmberError, Result};
