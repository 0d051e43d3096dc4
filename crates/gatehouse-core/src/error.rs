//! Error types for the Gatehouse core library.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the Gatehouse [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Gatehouse operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No primary mailbox file exists for the given entry id.
    #[error("No pending entry for id {id:?}")]
    NotFound { id: String },

    /// A response file already exists for the given entry id. Callers that
    /// only care about the outcome treat this as success: the decision the
    /// caller wanted to record has already been recorded.
    #[error("Entry {id:?} already has a response")]
    AlreadyResolved { id: String },

    /// An entry id that cannot be used as a mailbox file name.
    #[error("Invalid entry id {id:?}")]
    InvalidId { id: String },

    /// A primary mailbox file that exists but does not parse. Enumeration
    /// skips these (the file is left in place for inspection); direct reads
    /// surface the error.
    #[error("Malformed mailbox entry at {path}: {source}")]
    MalformedEntry {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// An external helper binary (e.g. tmux) could not be found or run.
    #[error("External tool unavailable: {tool}")]
    ToolUnavailable { tool: String },

    /// A pane-injection step failed after the tool itself was reachable.
    #[error("Prompt injection failed: {0}")]
    Injection(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
