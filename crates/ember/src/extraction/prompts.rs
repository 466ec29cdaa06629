//! Prompt for the extraction collaborator
//!
//! A single call extracts both tracks. The response uses a sectioned
//! plain-text format parsed by [`crate::extraction::parser`].

/// Placeholders: {user_name}, {assistant_name}, {max_episodic},
/// {max_factual}, {conversation}
pub const EXTRACTION_PROMPT: &str = r#"You are {assistant_name}. Review the conversation below between you and {user_name} and extract two kinds of memories.

EPISODIC memories describe what happened: topics discussed, decisions reached, moments that mattered.
- Write each in the first person as {assistant_name}, referring to the other person as {user_name}.
- One or two sentences per memory, one memory per significant topic.
- Be specific: names, details, context. Skip small talk.
- At most {max_episodic} episodic memories.

FACTUAL memories are concrete facts about {user_name}.
- Only what {user_name} stated or confirmed. Your own suggestions are not facts.
- Write each as a third-person assertion ("{user_name} prefers...").
- At most {max_factual} factual memories.

Rate every memory from 1 to 10:
- 8-10: identity, life decisions, strong lasting preferences
- 5-7: useful context, notable conversations
- 3-4: minor details worth keeping
- 1-2: trivial; do not output these

Type labels:
- episodic: fact, preference, event, reflection, observation
- factual: fact, preference

Respond in exactly this format and nothing else:

===EPISODIC===
MEMORY: <memory text>
IMPORTANCE: <1-10>
TYPE: <type>
TOPIC: <short topic>

===FACTUAL===
FACT: <fact text>
IMPORTANCE: <1-10>
TYPE: <fact or preference>

Repeat the MEMORY or FACT block for each entry, separated by a blank line.
Write NONE under a section header when that section has no entries.

<conversation>
{conversation}
</conversation>"#;

/// Fill the extraction prompt for one batch
pub fn render_extraction_prompt(
    conversation: &str,
    user_name: &str,
    assistant_name: &str,
    max_episodic: usize,
    max_factual: usize,
) -> String {
    EXTRACTION_PROMPT
        .replace("{user_name}", user_name)
        .replace("{assistant_name}", assistant_name)
        .replace("{max_episodic}", &max_episodic.to_string())
        .replace("{max_factual}", &max_factual.to_string())
        .replace("{conversation}", conversation)
}
