//! Background extraction of memories from overflowing conversation turns

pub mod batch;
pub mod parser;
pub mod pipeline;
pub mod prompts;
pub mod provider;
pub mod remote;
pub mod types;
pub mod watcher;

pub use batch::ExtractionBatch;
pub use pipeline::{CommitSummary, CycleOutcome, ExtractionPipeline, PipelineState};
pub use provider::ExtractionCollaborator;
pub use remote::RemoteExtractor;
pub use types::{Candidate, ExtractorError, RawCandidate, RawExtraction};
pub use watcher::{WatcherHandle, spawn_watcher};
