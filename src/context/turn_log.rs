//! Undo/redo over committed turn pairs.
//!
//! The log stores whole (user, assistant) exchanges. Undo moves the last
//! exchange out of the history onto the log; redo moves it back. Committing
//! a fresh exchange through the normal turn-taking path invalidates every
//! pending redo, so redo is only ever valid straight after undo.

use serde::{Deserialize, Serialize};

use super::history::History;

/// A committed (user, assistant) exchange.
pub type TurnPair = (super::turn::Turn, super::turn::Turn);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnLog {
    /// Exchanges removed by undo, newest last. Redo pops from here; a
    /// fresh commit clears it.
    undone: Vec<TurnPair>,
}

impl TurnLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(undone: Vec<TurnPair>) -> Self {
        Self { undone }
    }

    pub fn pairs(&self) -> &[TurnPair] {
        &self.undone
    }

    /// Number of exchanges available for redo.
    pub fn pending(&self) -> usize {
        self.undone.len()
    }

    /// Undo the last exchange. Legal only when the history ends with a user
    /// turn followed by an assistant turn; otherwise a no-op returning false.
    pub fn undo(&mut self, history: &mut History) -> bool {
        if !history.ends_with_exchange() {
            return false;
        }
        if let (Some(assistant), Some(user)) = (history.pop(), history.pop()) {
            self.undone.push((user, assistant));
            true
        } else {
            false
        }
    }

    /// Re-append the most recently undone exchange. No-op returning false
    /// when nothing is pending.
    pub fn redo(&mut self, history: &mut History) -> bool {
        match self.undone.pop() {
            Some((user, assistant)) => {
                history.push(user);
                history.push(assistant);
                true
            }
            None => false,
        }
    }

    /// Called whenever a fresh exchange is committed outside of redo.
    pub fn invalidate(&mut self) {
        self.undone.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::turn::Turn;

    fn exchange_history() -> History {
        let mut history = History::with_system("s");
        history.push_user("u1");
        history.push_assistant("a1");
        history.push_user("u2");
        history.push_assistant("a2");
        history
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let mut history = exchange_history();
        let original = history.clone();
        let mut log = TurnLog::new();

        assert!(log.undo(&mut history));
        assert_eq!(history.len(), 3);
        assert_eq!(log.pending(), 1);

        assert!(log.redo(&mut history));
        assert_eq!(history, original);
        assert_eq!(log.pending(), 0);
    }

    #[test]
    fn test_undo_illegal_when_no_trailing_exchange() {
        let mut history = History::with_system("s");
        history.push_user("orphan");
        let mut log = TurnLog::new();
        assert!(!log.undo(&mut history));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_redo_illegal_when_empty() {
        let mut history = exchange_history();
        let mut log = TurnLog::new();
        assert!(!log.redo(&mut history));
        assert_eq!(history, exchange_history());
    }

    #[test]
    fn test_fresh_commit_invalidates_redo() {
        let mut history = exchange_history();
        let mut log = TurnLog::new();
        assert!(log.undo(&mut history));

        // A fresh exchange lands through the normal turn-taking path.
        history.push(Turn::user("u3"));
        history.push(Turn::assistant("a3"));
        log.invalidate();

        assert_eq!(log.pending(), 0);
        assert!(!log.redo(&mut history));
    }

    #[test]
    fn test_multiple_undo_redo_order() {
        let mut history = exchange_history();
        let mut log = TurnLog::new();
        assert!(log.undo(&mut history));
        assert!(log.undo(&mut history));
        assert_eq!(history.len(), 1);

        assert!(log.redo(&mut history));
        assert_eq!(history.turns()[1].content, "u1");
        assert!(log.redo(&mut history));
        assert_eq!(history, exchange_history());
    }
}
