//! Conversation transcript
//!
//! The transcript is append-only. Append order is conversational order and is
//! what gets sent to the chat collaborator; `created_at` is informational.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person speaking into the microphone
    User,
    /// The language model's reply
    Assistant,
}

impl Role {
    /// Wire name used by chat-completion APIs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One utterance in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Create a turn stamped with the current time
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// Create a user turn
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant turn
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// `{role, content}` pair as exchanged with chat endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.clone(),
        }
    }
}

impl From<ChatMessage> for Turn {
    fn from(message: ChatMessage) -> Self {
        Self::new(message.role, message.content)
    }
}

/// Ordered, append-only history of turns
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    #[must_use]
    pub const fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Append a turn and return a copy of it
    pub fn append(&mut self, turn: Turn) -> Turn {
        self.turns.push(turn.clone());
        turn
    }

    /// All turns in append order
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Most recent turn
    #[must_use]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// History in chat wire form, oldest first
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.turns.iter().map(ChatMessage::from).collect()
    }
}
