//! Extraction candidate types
//!
//! The collaborator's output is untrusted: it arrives as [`RawCandidate`]s
//! carrying unparsed strings and only becomes a [`Candidate`] after
//! validation.

use serde::Serialize;

use crate::error::{EmberError, Result};
use crate::memory::types::{MemoryKind, Track};

/// Shortest content accepted on the episodic track
pub const MIN_EPISODIC_CHARS: usize = 10;
/// Shortest content accepted on the factual track
pub const MIN_FACTUAL_CHARS: usize = 5;

/// One memory as returned by the collaborator, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCandidate {
    pub content: String,
    /// Importance rating as written by the collaborator, expected 1-10
    pub importance: Option<String>,
    /// Type label as written by the collaborator
    pub kind: Option<String>,
    pub topic: Option<String>,
}

impl RawCandidate {
    pub fn new(content: impl Into<String>, importance: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            importance: Some(importance.into()),
            kind: Some(kind.into()),
            topic: None,
        }
    }
}

/// Everything a collaborator extracted from one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawExtraction {
    pub episodic: Vec<RawCandidate>,
    pub factual: Vec<RawCandidate>,
}

impl RawExtraction {
    pub fn is_empty(&self) -> bool {
        self.episodic.is_empty() && self.factual.is_empty()
    }
}

/// A validated candidate memory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub track: Track,
    pub content: String,
    /// Rating on the 1-10 scale
    pub rating: u8,
    pub kind: MemoryKind,
    pub topic: Option<String>,
}

impl Candidate {
    /// Validate a raw candidate for `track`
    ///
    /// Fails with [`EmberError::MalformedCandidate`] when the rating is
    /// missing or not 1-10, the type label is unknown or not allowed on the
    /// track, or the content is too short.
    pub fn validate(track: Track, raw: &RawCandidate) -> Result<Self> {
        let content = raw.content.trim();
        let min_chars = match track {
            Track::Episodic => MIN_EPISODIC_CHARS,
            Track::Factual => MIN_FACTUAL_CHARS,
        };
        if content.chars().count() < min_chars {
            return Err(EmberError::MalformedCandidate(format!(
                "{track} content too short ({} chars)",
                content.chars().count()
            )));
        }

        let rating = raw
            .importance
            .as_deref()
            .ok_or_else(|| EmberError::MalformedCandidate("missing importance rating".to_string()))
            .and_then(parse_rating)?;

        let kind: MemoryKind = raw
            .kind
            .as_deref()
            .ok_or_else(|| EmberError::MalformedCandidate("missing type label".to_string()))?
            .parse()
            .map_err(EmberError::MalformedCandidate)?;

        if !kind.allowed_on(track) {
            return Err(EmberError::MalformedCandidate(format!(
                "type '{kind}' is not allowed on the {track} track"
            )));
        }

        Ok(Self {
            track,
            content: content.to_string(),
            rating,
            kind,
            topic: raw
                .topic
                .as_ref()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        })
    }

    /// Rating normalized to [0, 1]
    pub fn importance(&self) -> f32 {
        (f32::from(self.rating) / 10.0).clamp(0.0, 1.0)
    }
}

/// Parse a 1-10 rating, tolerating forms like `7`, ` 7 ` or `7/10`
pub fn parse_rating(raw: &str) -> Result<u8> {
    let digits: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();

    let rating: u8 = digits.parse().map_err(|_| {
        EmberError::MalformedCandidate(format!("unparseable importance rating '{}'", raw.trim()))
    })?;

    if !(1..=10).contains(&rating) {
        return Err(EmberError::MalformedCandidate(format!(
            "importance rating {rating} outside 1-10"
        )));
    }
    Ok(rating)
}

/// Extraction collaborator errors
#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    /// Upstream API returned an error or could not be reached
    #[error("API error: {0}")]
    ApiError(String),

    /// The response did not follow the expected format
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Missing credentials or invalid settings
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The call did not complete in time
    #[error("Timed out after {0} seconds")]
    Timeout(u64),
}
