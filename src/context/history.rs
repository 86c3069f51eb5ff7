//! The conversation history as an explicitly owned value.
//!
//! There is no ambient history state anywhere in the crate. Every operation
//! that reads or rewrites the conversation takes a `History` (or a mutable
//! handle to one) and the chat session owns the single live instance.

use serde::{Deserialize, Serialize};

use super::turn::{Role, Turn};

/// Ordered sequence of turns. A well-formed history starts with a single
/// system turn followed by strictly alternating user/assistant turns; a
/// freshly loaded history may not satisfy that yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    /// A new history seeded with a single system turn.
    pub fn with_system(content: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::system(content)],
        }
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Turn count excluding the leading system turn.
    pub fn exchange_len(&self) -> usize {
        self.turns.len() - usize::from(self.has_system())
    }

    pub fn has_system(&self) -> bool {
        self.turns.first().map(|t| t.role) == Some(Role::System)
    }

    /// The leading system turn, if the history starts with one.
    pub fn system(&self) -> Option<&Turn> {
        self.turns.first().filter(|t| t.role == Role::System)
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::assistant(content));
    }

    pub fn pop(&mut self) -> Option<Turn> {
        self.turns.pop()
    }

    /// Remove the last turn only if it has the given role. Used to roll a
    /// user turn back out of the history when generation fails or is
    /// cancelled, so no orphaned user turn survives.
    pub fn pop_if_role(&mut self, role: Role) -> Option<Turn> {
        if self.turns.last().map(|t| t.role) == Some(role) {
            self.turns.pop()
        } else {
            None
        }
    }

    /// True when the history ends with a user turn followed by an assistant
    /// turn, the only state undo may act on.
    pub fn ends_with_exchange(&self) -> bool {
        let n = self.turns.len();
        n >= 2
            && self.turns[n - 2].role == Role::User
            && self.turns[n - 1].role == Role::Assistant
    }

    /// Rewrite the leading system turn's content, inserting one if the
    /// history does not start with a system turn.
    pub fn set_system_content(&mut self, content: impl Into<String>) {
        let content = content.into();
        match self.turns.first_mut() {
            Some(first) if first.role == Role::System => first.content = content,
            _ => self.turns.insert(0, Turn::system(content)),
        }
    }

    /// Explicit context clear. Drops everything and re-seeds a single
    /// system turn.
    pub fn reset(&mut self, system_content: impl Into<String>) {
        self.turns.clear();
        self.turns.push(Turn::system(system_content));
    }
}
