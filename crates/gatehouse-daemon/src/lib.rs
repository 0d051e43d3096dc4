//! Gatehouse Daemon Library
//!
//! The long-running operator side of the mailbox protocol:
//! - Mailbox store: atomic request/response file pairs in a shared directory
//! - Liveness probes for requester processes and tmux panes
//! - Auto-allow cache and background sweep
//! - Approval service: pending-entry resolution, decision intake, prompt dispatch
//! - JSON data-plane served over HTTP for the operator UI

pub mod approval;
pub mod liveness;
pub mod mailbox;
pub mod server;
pub mod tmux;
