//! Conversation context management.
//!
//! The core of the crate: turn validation and deduplication, token budget
//! estimation and trimming, lossy compression of older history, integrity
//! verification and repair, and the undo/redo log over committed exchanges.

mod compress;
mod history;
mod integrity;
mod tokens;
mod trim;
mod turn;
mod turn_log;

pub use compress::{compress, fold_into_summary};
pub use history::History;
pub use integrity::{repair, verify};
pub use tokens::{estimate, estimate_history};
pub use trim::trim;
pub use turn::{deduplicate, filter_valid, fingerprint, is_valid_turn, Role, Turn};
pub use turn_log::{TurnLog, TurnPair};
