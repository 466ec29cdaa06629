//! Sessions and session ids
//!
//! A session owns the warmth cache for one conversation. Session ids are
//! validated the same way everywhere they enter the engine: non-empty,
//! ASCII alphanumerics plus `_` and `-`, at most 128 characters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::Mutex as TokioMutex;

use crate::config::WarmthConfig;
use crate::memory::warmth::WarmthCache;

/// Maximum length for session IDs
const MAX_SESSION_ID_LEN: usize = 128;

/// Errors that can occur during session ID validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionIdError {
    #[error("Session ID cannot be empty")]
    Empty,

    #[error("Session ID contains invalid characters: allowed are a-z, A-Z, 0-9, _, -")]
    InvalidChars,

    #[error("Session ID exceeds maximum length of {MAX_SESSION_ID_LEN} characters")]
    TooLong,
}

/// A validated session ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), SessionIdError> {
        if s.is_empty() {
            return Err(SessionIdError::Empty);
        }

        if s.len() > MAX_SESSION_ID_LEN {
            return Err(SessionIdError::TooLong);
        }

        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(SessionIdError::InvalidChars);
        }

        Ok(())
    }
}

impl TryFrom<&str> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::validate(value)?;
        Ok(SessionId(value.to_string()))
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::validate(&value)?;
        Ok(SessionId(value))
    }
}

impl From<SessionId> for String {
    fn from(session_id: SessionId) -> Self {
        session_id.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Live state for one conversation
///
/// The warmth cache sits behind an async mutex: retrieval holds it across
/// scoring and boosting so a concurrent turn advance cannot interleave.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    started_at: DateTime<Utc>,
    turn_counter: AtomicU64,
    warmth: TokioMutex<WarmthCache>,
}

impl Session {
    pub fn new(id: SessionId, warmth: &WarmthConfig) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            turn_counter: AtomicU64::new(0),
            warmth: TokioMutex::new(WarmthCache::new(warmth.clone())),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Turns advanced since the session opened
    pub fn turn_count(&self) -> u64 {
        self.turn_counter.load(Ordering::SeqCst)
    }

    /// Record a new turn and decay the session's warmth one step
    pub async fn advance_turn(&self) -> u64 {
        let mut warmth = self.warmth.lock().await;
        warmth.advance_turn();
        self.turn_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Exclusive access to the warmth cache
    pub async fn warmth(&self) -> tokio::sync::MutexGuard<'_, WarmthCache> {
        self.warmth.lock().await
    }

    /// Drop all warmth entries
    pub async fn clear_warmth(&self) {
        self.warmth.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_valid_session_ids() {
        assert!(SessionId::try_from("project-abc").is_ok());
        assert!(SessionId::try_from("PROJECT_123").is_ok());
        assert!(SessionId::try_from("a").is_ok());
        assert!(SessionId::try_from("a".repeat(128)).is_ok());
    }

    #[test]
    fn test_invalid_session_ids() {
        assert!(matches!(SessionId::try_from(""), Err(SessionIdError::Empty)));
        assert!(matches!(
            SessionId::try_from("has spaces"),
            Err(SessionIdError::InvalidChars)
        ));
        assert!(matches!(
            SessionId::try_from("a".repeat(129)),
            Err(SessionIdError::TooLong)
        ));
    }

    #[test]
    fn test_serde_validates_session_id() {
        let id: SessionId = serde_json::from_str("\"chat-1\"").unwrap();
        assert_eq!(id.as_str(), "chat-1");
        assert!(serde_json::from_str::<SessionId>("\"bad id\"").is_err());
    }

    #[tokio::test]
    async fn test_advance_turn_counts_and_decays() {
        let session = Session::new(
            SessionId::try_from("s1").unwrap(),
            &WarmthConfig::default(),
        );
        let id = Uuid::new_v4();
        session.warmth().await.boost_retrieval(id);

        assert_eq!(session.advance_turn().await, 1);
        assert_eq!(session.turn_count(), 1);

        let boost = session.warmth().await.combined_boost(&id);
        assert!((boost - 0.09).abs() < 1e-6, "0.15 * 0.6 expected, got {boost}");
    }

    #[tokio::test]
    async fn test_clear_warmth() {
        let session = Session::new(
            SessionId::try_from("s1").unwrap(),
            &WarmthConfig::default(),
        );
        session.warmth().await.boost_topic(Uuid::new_v4());
        session.clear_warmth().await;
        assert!(session.warmth().await.is_empty());
    }
}
