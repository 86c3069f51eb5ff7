//! Loreweaver - interactive storytelling over a local Ollama backend.
//!
//! A terminal chat where the user narrates scenes and the model answers in
//! character. The interesting part is context management: the conversation
//! history is validated, deduplicated, budget-trimmed, compressible, and
//! repairable, with undo/redo over committed exchanges and a fact list
//! that keeps long stories self-consistent.

pub mod chat;
pub mod client;
pub mod config;
pub mod context;
pub mod facts;
pub mod prompt;
pub mod session;
pub mod story;

pub use chat::ChatSession;
pub use client::{CancelToken, ChatClient, StreamEvent};
pub use config::{LoreweaverConfig, SamplingOptions};
pub use context::{History, Role, Turn, TurnLog};
pub use facts::FactList;
pub use session::SessionStore;
pub use story::{StorySetting, StoryStore, WorldTemplate};

/// Result type for Loreweaver operations
pub type Result<T> = std::result::Result<T, LoreweaverError>;

/// Errors that can occur in Loreweaver
#[derive(Debug, thiserror::Error)]
pub enum LoreweaverError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Story error: {0}")]
    Story(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
