//! Session-scoped auto-allow rules and the background sweep.
//!
//! A rule is the pair (session id, tool name); its only value is presence.
//! Rules live purely in memory: they are created by an explicit "allow this
//! session" decision and die on session reset/end or daemon restart. The
//! sweep resolves any unanswered permission request matching a rule, so a
//! blocked requester is released without operator interaction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use gatehouse_core::entry::{DecisionResponse, EntryKind, PendingEntry};
use gatehouse_core::{Error, Result};

use crate::mailbox::MailboxStore;

/// Owned store of session auto-allow rules, shared between the HTTP
/// handlers and the sweep task.
#[derive(Debug, Default)]
pub struct AutoAllowCache {
    /// session id -> tool names allowed for that session.
    rules: RwLock<HashMap<String, HashSet<String>>>,
}

impl AutoAllowCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotently add a rule. Returns whether it was newly inserted.
    pub async fn register(&self, session_id: &str, tool_name: &str) -> bool {
        let mut rules = self.rules.write().await;
        rules
            .entry(session_id.to_string())
            .or_default()
            .insert(tool_name.to_string())
    }

    pub async fn contains(&self, session_id: &str, tool_name: &str) -> bool {
        self.rules
            .read()
            .await
            .get(session_id)
            .is_some_and(|tools| tools.contains(tool_name))
    }

    /// Drop every rule of a session. Returns how many were removed.
    pub async fn clear_session(&self, session_id: &str) -> usize {
        let removed = self
            .rules
            .write()
            .await
            .remove(session_id)
            .map_or(0, |tools| tools.len());
        if removed > 0 {
            debug!(session_id, removed, "Cleared session auto-allow rules");
        }
        removed
    }

    pub async fn is_empty(&self) -> bool {
        self.rules.read().await.is_empty()
    }

    /// Resolve every unanswered permission request matching a rule with an
    /// `allow` response. Never reaps: liveness belongs to the resolver, and
    /// duplicating the deletion here would race it for no benefit. Returns
    /// how many entries were auto-allowed.
    pub async fn sweep(&self, store: &MailboxStore) -> Result<usize> {
        // Snapshot under a short read lock; the sweep itself does file I/O.
        let rules = self.rules.read().await.clone();
        if rules.is_empty() {
            return Ok(0);
        }

        let mut allowed = 0;
        for entry in store.list_primary(EntryKind::PermissionRequest)? {
            let PendingEntry::PermissionRequest(req) = entry else {
                continue;
            };
            let matched = rules
                .get(&req.session_id)
                .is_some_and(|tools| tools.contains(&req.tool_name));
            if !matched {
                continue;
            }
            match store
                .write_response(&req.id, EntryKind::PermissionRequest, &DecisionResponse::allow())
                .await
            {
                Ok(()) => {
                    allowed += 1;
                    info!(
                        id = %req.id,
                        session_id = %req.session_id,
                        tool_name = %req.tool_name,
                        "Auto-allowed by session rule"
                    );
                }
                // Lost the race against the intake path or a reap; the
                // entry is settled either way.
                Err(Error::AlreadyResolved { .. } | Error::NotFound { .. }) => {}
                Err(e) => {
                    warn!(id = %req.id, error = %e, "Auto-allow write failed");
                }
            }
        }
        Ok(allowed)
    }
}

/// Spawn the fixed-period sweep task. Runs until `shutdown` flips.
pub fn spawn_sweep_task(
    cache: Arc<AutoAllowCache>,
    store: Arc<MailboxStore>,
    period: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        timer.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if cache.is_empty().await {
                        continue;
                    }
                    if let Err(e) = cache.sweep(&store).await {
                        warn!(error = %e, "Auto-allow sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Auto-allow sweep task shutting down");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn seed_request(store: &MailboxStore, id: &str, session_id: &str, tool_name: &str) {
        let payload = json!({
            "id": id,
            "session_id": session_id,
            "tool_name": tool_name,
            "tool_input": {},
        });
        std::fs::write(
            store.primary_path(id, EntryKind::PermissionRequest),
            serde_json::to_vec(&payload).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let cache = AutoAllowCache::new();
        assert!(cache.register("s1", "Read").await);
        assert!(!cache.register("s1", "Read").await);
        assert!(cache.contains("s1", "Read").await);
        assert!(!cache.contains("s1", "Bash").await);
        assert!(!cache.contains("s2", "Read").await);
    }

    #[tokio::test]
    async fn clear_session_removes_only_that_session() {
        let cache = AutoAllowCache::new();
        cache.register("s1", "Read").await;
        cache.register("s1", "Edit").await;
        cache.register("s2", "Read").await;

        assert_eq!(cache.clear_session("s1").await, 2);
        assert!(!cache.contains("s1", "Read").await);
        assert!(cache.contains("s2", "Read").await);
    }

    #[tokio::test]
    async fn sweep_allows_matching_entries_only() {
        let dir = TempDir::new().unwrap();
        let store = MailboxStore::open(dir.path()).unwrap();
        let cache = AutoAllowCache::new();

        seed_request(&store, "r1", "s1", "Read");
        seed_request(&store, "r2", "s1", "Bash");
        seed_request(&store, "r3", "s2", "Read");
        cache.register("s1", "Read").await;

        assert_eq!(cache.sweep(&store).await.unwrap(), 1);
        assert!(store.response_exists("r1", EntryKind::PermissionRequest));
        assert!(!store.response_exists("r2", EntryKind::PermissionRequest));
        assert!(!store.response_exists("r3", EntryKind::PermissionRequest));

        let raw = std::fs::read_to_string(store.response_path("r1", EntryKind::PermissionRequest))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["decision"], "allow");
    }

    #[tokio::test]
    async fn sweep_with_no_rules_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let store = MailboxStore::open(dir.path()).unwrap();
        let cache = AutoAllowCache::new();

        seed_request(&store, "r1", "s1", "Read");
        assert_eq!(cache.sweep(&store).await.unwrap(), 0);
        assert!(!store.response_exists("r1", EntryKind::PermissionRequest));
    }

    #[tokio::test]
    async fn sweep_skips_already_answered_entries() {
        let dir = TempDir::new().unwrap();
        let store = MailboxStore::open(dir.path()).unwrap();
        let cache = AutoAllowCache::new();

        seed_request(&store, "r1", "s1", "Read");
        store
            .write_response("r1", EntryKind::PermissionRequest, &DecisionResponse::deny())
            .await
            .unwrap();
        cache.register("s1", "Read").await;

        assert_eq!(cache.sweep(&store).await.unwrap(), 0);
        // The operator's deny stands.
        let raw = std::fs::read_to_string(store.response_path("r1", EntryKind::PermissionRequest))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["decision"], "deny");
    }
}
