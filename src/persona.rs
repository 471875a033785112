//! Assistant persona
//!
//! A persona is the fixed system instruction the chat collaborator receives
//! ahead of every conversation. It is static configuration, never part of the
//! transcript.

use serde::{Deserialize, Serialize};

/// Built-in language teacher instruction
pub const LANGUAGE_TEACHER_PROMPT: &str = "\
You are a language teacher.
Your job is to teach:
- German (A1 level, very simple)
- Italian (A1 level, very simple)
- English (basic to intermediate)
- French (basic)

Rules:
- Explain simply.
- Use short sentences.
- Give examples.
- Correct mistakes politely.
- If the user writes in Arabic or Tunisian dialect, explain in Arabic.
- Focus on speaking, grammar, and daily conversations.
";

/// Identity and system instruction of the assistant
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    /// Display name
    pub name: String,

    /// Instruction prepended to every chat request
    pub system_prompt: String,
}

impl Persona {
    #[must_use]
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
        }
    }

    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::new("teacher", LANGUAGE_TEACHER_PROMPT)
    }
}
