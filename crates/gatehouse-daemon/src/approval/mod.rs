//! Operator-side policy over the mailbox.
//!
//! Resolves the live pending set, applies session auto-allow rules, records
//! decisions, and dispatches operator prompts back to waiting requesters.

mod autoallow;
mod service;

pub use autoallow::{AutoAllowCache, spawn_sweep_task};
pub use service::{ApprovalService, RespondParams, SessionReset};
