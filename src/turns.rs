/// Conversation context replayed to the generator on every refinement.
///
/// The log only ever grows by whole rounds (one user turn, one assistant
/// turn), so its length is always even. An empty log means the next request
/// is a full regeneration rather than a refinement.
use serde::{Deserialize, Serialize};

use crate::document::{self, Document};

// ── Turn ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in the log. Fields are private: a turn never changes after
/// it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    /// Assistant turn for a successful round, encoded in the same shape the
    /// model is asked to reply in so it recognises its own previous UI.
    pub fn assistant(explanation: Option<&str>, document: &Document) -> Self {
        Self {
            role: Role::Assistant,
            content: document::encode_reply(explanation, document),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

// ── TurnLog ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TurnLog {
    turns: Vec<Turn>,
}

impl TurnLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one completed round.
    pub fn push_round(&mut self, user: Turn, assistant: Turn) {
        debug_assert_eq!(user.role, Role::User);
        debug_assert_eq!(assistant.role, Role::Assistant);
        self.turns.push(user);
        self.turns.push(assistant);
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of completed rounds.
    pub fn rounds(&self) -> usize {
        self.turns.len() / 2
    }
}

impl<'a> IntoIterator for &'a TurnLog {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
