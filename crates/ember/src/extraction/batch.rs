//! Immutable extraction batches

use crate::memory::session::SessionId;
use crate::memory::types::{ConversationTurn, Role, TurnRange};

/// The oldest unprocessed turns of a session, fixed at selection time
#[derive(Debug, Clone)]
pub struct ExtractionBatch {
    session_id: SessionId,
    turns: Vec<ConversationTurn>,
}

impl ExtractionBatch {
    /// Returns `None` for an empty selection
    pub fn new(session_id: SessionId, turns: Vec<ConversationTurn>) -> Option<Self> {
        if turns.is_empty() {
            return None;
        }
        Some(Self { session_id, turns })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turn_ids(&self) -> Vec<i64> {
        self.turns.iter().map(|t| t.id).collect()
    }

    /// First and last turn id covered by this batch
    pub fn range(&self) -> Option<TurnRange> {
        let first = self.turns.iter().map(|t| t.id).min()?;
        let last = self.turns.iter().map(|t| t.id).max()?;
        Some(TurnRange { first, last })
    }

    /// One `Name: content` line per turn, in order
    pub fn to_prompt_text(&self, user_name: &str, assistant_name: &str) -> String {
        self.turns
            .iter()
            .map(|t| {
                let speaker = match t.role {
                    Role::User => user_name,
                    Role::Assistant => assistant_name,
                };
                format!("{}: {}", speaker, t.content.trim())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
