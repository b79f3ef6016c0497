//! Core type definitions for chorus.
//!
//! Personas are identified by their display name: the name is what the model
//! sees, what the sanitizer strips, and what the validator looks for.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::memory::MemoryLog;
use crate::mood::Mood;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identity of a persona, which is its display name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonaId(pub String);

impl PersonaId {
    /// Create a persona ID from a display name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The display name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PersonaId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

// ---------------------------------------------------------------------------
// Persona
// ---------------------------------------------------------------------------

/// A scripted chat participant with a fixed style and bounded memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// Who this persona is.
    pub id: PersonaId,
    /// Fixed role / style description fed to the model verbatim.
    pub role: String,
    /// Bounded log of short notes, most recent last.
    pub memory: MemoryLog,
    /// Current mood in [-1, 1].
    #[serde(default)]
    pub mood: Mood,
}

impl Persona {
    /// Create a persona with an empty memory holding at most `memory_max` notes.
    #[must_use]
    pub fn new(id: impl Into<PersonaId>, role: impl Into<String>, memory_max: usize) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            memory: MemoryLog::new(memory_max),
            mood: Mood::default(),
        }
    }

    /// Display name of this persona.
    #[must_use]
    pub fn name(&self) -> &str {
        self.id.as_str()
    }
}

// ---------------------------------------------------------------------------
// Chat turns
// ---------------------------------------------------------------------------

/// One produced utterance attributed to one persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Who said it.
    pub speaker: PersonaId,
    /// What was said (already sanitized and validated).
    pub text: String,
}

impl ChatTurn {
    /// Create a new chat turn.
    #[must_use]
    pub fn new(speaker: impl Into<PersonaId>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
        }
    }

    /// Render as a `[name]: text` context line.
    #[must_use]
    pub fn context_line(&self) -> String {
        format!("[{}]: {}", self.speaker, self.text)
    }
}

impl fmt::Display for ChatTurn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]: {}", self.speaker, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persona_id_displays_name() {
        let id = PersonaId::new("Даша");
        assert_eq!(id.to_string(), "Даша");
        assert_eq!(id.as_str(), "Даша");
    }

    #[test]
    fn chat_turn_renders_context_line() {
        let turn = ChatTurn::new("Ника", "Погнали!");
        assert_eq!(turn.context_line(), "[Ника]: Погнали!");
        assert_eq!(turn.to_string(), turn.context_line());
    }

    #[test]
    fn persona_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&PersonaId::new("Кирилл")).expect("serialize");
        assert_eq!(json, "\"Кирилл\"");
    }
}
