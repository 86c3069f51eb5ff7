//! Turn types, boundary validation, and duplicate detection.
//!
//! Session files arrive from disk as raw JSON and may carry entries that
//! are not turns at all. Shape validation happens here, once, at the
//! boundary; past this point a `Turn` always has a known role and string
//! content. Emptiness is a separate concern handled by the integrity
//! verifier.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::warn;

/// Message role. Exactly one system turn is expected per history, always first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// True when the content is empty or whitespace-only.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Check that a raw JSON value has the wire shape of a turn: an object with
/// a recognized `role` and a string `content`. Content may still be empty;
/// that is for the integrity verifier to judge.
pub fn is_valid_turn(value: &serde_json::Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    let Some(role) = obj.get("role").and_then(|r| r.as_str()) else {
        return false;
    };
    if !matches!(role, "system" | "user" | "assistant") {
        return false;
    }
    obj.get("content").map(|c| c.is_string()).unwrap_or(false)
}

/// Convert raw JSON entries into typed turns, dropping anything that fails
/// shape validation. Returns the surviving turns and the dropped count so
/// callers can report how much was discarded.
pub fn filter_valid(values: &[serde_json::Value]) -> (Vec<Turn>, usize) {
    let mut turns = Vec::with_capacity(values.len());
    let mut dropped = 0;

    for value in values {
        if is_valid_turn(value) {
            if let Ok(turn) = serde_json::from_value::<Turn>(value.clone()) {
                turns.push(turn);
                continue;
            }
        }
        warn!("Invalid turn skipped: {}", value);
        dropped += 1;
    }

    (turns, dropped)
}

/// Deterministic digest over the (role, content) pair. Two turns with equal
/// fingerprints are duplicates regardless of where they sit in the history.
pub fn fingerprint(turn: &Turn) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(turn.role.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(turn.content.as_bytes());
    hasher.finalize().into()
}

/// Remove duplicate turns, first occurrence wins, order preserved.
/// Returns the filtered turns and the number removed.
pub fn deduplicate(turns: Vec<Turn>) -> (Vec<Turn>, usize) {
    let mut seen: HashSet<[u8; 32]> = HashSet::with_capacity(turns.len());
    let mut unique = Vec::with_capacity(turns.len());
    let mut removed = 0;

    for turn in turns {
        if seen.insert(fingerprint(&turn)) {
            unique.push(turn);
        } else {
            removed += 1;
        }
    }

    (unique, removed)
}
