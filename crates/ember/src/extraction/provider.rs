//! Extraction collaborator trait
//!
//! Abstracts the language model that turns a batch of turns into candidate
//! memories (remote API, scripted test double, ...).

use async_trait::async_trait;

use crate::extraction::types::{ExtractorError, RawExtraction};

#[async_trait]
pub trait ExtractionCollaborator: Send + Sync {
    /// Extract candidate memories from formatted batch text
    ///
    /// `user_identity` is the name the collaborator should use for the user.
    /// Errors are treated as transient and retried by the pipeline.
    async fn extract(
        &self,
        batch_text: &str,
        user_identity: &str,
    ) -> Result<RawExtraction, ExtractorError>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}
