//! Parser for the sectioned extraction response
//!
//! ```text
//! ===EPISODIC===
//! MEMORY: ...
//! IMPORTANCE: 7
//! TYPE: event
//! TOPIC: ...
//!
//! ===FACTUAL===
//! FACT: ...
//! IMPORTANCE: 5
//! TYPE: fact
//! ```
//!
//! Parsing is lenient about whitespace, case of field names and stray
//! lines. Values are kept as raw strings; validation happens later.

use crate::extraction::types::{ExtractorError, RawCandidate, RawExtraction};

const EPISODIC_MARKER: &str = "===EPISODIC===";
const FACTUAL_MARKER: &str = "===FACTUAL===";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Episodic,
    Factual,
}

/// Parse a collaborator response into raw candidates
///
/// Fails when neither section marker is present, which usually means the
/// model ignored the format.
pub fn parse_extraction_response(text: &str) -> Result<RawExtraction, ExtractorError> {
    if !text.contains(EPISODIC_MARKER) && !text.contains(FACTUAL_MARKER) {
        return Err(ExtractorError::ParseError(
            "response has neither ===EPISODIC=== nor ===FACTUAL=== section".to_string(),
        ));
    }

    let mut result = RawExtraction::default();
    let mut section = Section::Preamble;
    let mut current: Option<RawCandidate> = None;

    for line in text.lines() {
        let line = line.trim();

        if line == EPISODIC_MARKER || line == FACTUAL_MARKER {
            flush(&mut result, section, current.take());
            section = if line == EPISODIC_MARKER {
                Section::Episodic
            } else {
                Section::Factual
            };
            continue;
        }

        if section == Section::Preamble || line.is_empty() || line.eq_ignore_ascii_case("none") {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();

        match key.trim().to_ascii_uppercase().as_str() {
            "MEMORY" | "FACT" => {
                flush(&mut result, section, current.take());
                current = Some(RawCandidate {
                    content: value,
                    ..RawCandidate::default()
                });
            }
            "IMPORTANCE" => {
                if let Some(c) = current.as_mut() {
                    c.importance = Some(value);
                }
            }
            "TYPE" => {
                if let Some(c) = current.as_mut() {
                    c.kind = Some(value);
                }
            }
            "TOPIC" => {
                if let Some(c) = current.as_mut() {
                    c.topic = Some(value);
                }
            }
            _ => {}
        }
    }
    flush(&mut result, section, current.take());

    Ok(result)
}

fn flush(result: &mut RawExtraction, section: Section, candidate: Option<RawCandidate>) {
    let Some(candidate) = candidate else {
        return;
    };
    match section {
        Section::Episodic => result.episodic.push(candidate),
        Section::Factual => result.factual.push(candidate),
        Section::Preamble => {}
    }
}
