//! Gatehouse Core Library
//!
//! Shared functionality for Gatehouse components:
//! - Mailbox entry model (permission requests, prompt-waiting markers, responses)
//! - Configuration resolution and hierarchy
//! - Allow-list settings-file patching for "always allow" decisions
//! - Common error types

pub mod config;
pub mod entry;
pub mod error;
pub mod settings;
pub mod tracing_init;

pub use config::Config;
pub use entry::{Decision, EntryKind, PendingEntry, PermissionRequest, PromptWaiting};
pub use error::{Error, Result};
