//! The approval data-plane.
//!
//! Everything the operator UI can do goes through [`ApprovalService`]:
//! list the live pending set, record decisions, manage session rules, and
//! dispatch prompts. Each read runs the auto-allow sweep first so the
//! caller never sees an entry a just-registered rule would have settled.

use std::sync::Arc;

use tracing::{info, warn};

use gatehouse_core::entry::{
    Decision, DecisionResponse, EntryKind, PendingEntry, PromptResponse, Verdict,
};
use gatehouse_core::{Error, Result, settings};

use crate::liveness::Liveness;
use crate::mailbox::MailboxStore;
use crate::tmux::TmuxInjector;

use super::autoallow::AutoAllowCache;

/// Parameters of a [`ApprovalService::respond`] call.
#[derive(Debug, Clone)]
pub struct RespondParams {
    pub id: String,
    pub decision: Decision,
    /// Feedback routed back to the requester (plan rejection instructions,
    /// free-text answers, ...).
    pub message: Option<String>,
    /// Interactively-chosen pattern overriding the request's stored one.
    pub allow_pattern: Option<String>,
    /// Interactively-chosen split patterns; wins over `allow_pattern`.
    pub allow_patterns: Option<Vec<String>>,
}

impl RespondParams {
    pub const fn new(id: String, decision: Decision) -> Self {
        Self {
            id,
            decision,
            message: None,
            allow_pattern: None,
            allow_patterns: None,
        }
    }
}

/// Summary of a session reset, mostly for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReset {
    pub rules_cleared: usize,
    pub requests_denied: usize,
    pub prompts_dismissed: usize,
}

/// Operator-facing service over the shared mailbox.
pub struct ApprovalService {
    store: Arc<MailboxStore>,
    rules: Arc<AutoAllowCache>,
    liveness: Arc<dyn Liveness>,
    injector: TmuxInjector,
}

impl ApprovalService {
    pub fn new(
        store: Arc<MailboxStore>,
        rules: Arc<AutoAllowCache>,
        liveness: Arc<dyn Liveness>,
        injector: TmuxInjector,
    ) -> Self {
        Self {
            store,
            rules,
            liveness,
            injector,
        }
    }

    /// The live pending set: permission requests first, then prompt-waiting
    /// markers, each in file-name order. Runs the auto-allow sweep inline
    /// and reaps entries whose owner died.
    pub async fn list_pending(&self) -> Result<Vec<PendingEntry>> {
        self.rules.sweep(&self.store).await?;
        let mut pending = self.resolve_kind(EntryKind::PermissionRequest)?;
        pending.extend(self.resolve_kind(EntryKind::PromptWaiting)?);
        Ok(pending)
    }

    /// One resolver pass over a kind: answered entries are already filtered
    /// by the store; entries with a dead owner are deleted, never surfaced.
    fn resolve_kind(&self, kind: EntryKind) -> Result<Vec<PendingEntry>> {
        let mut live = Vec::new();
        for entry in self.store.list_primary(kind)? {
            if self.owner_alive(&entry) {
                live.push(entry);
            } else {
                info!(id = entry.id(), "Reaping abandoned entry (owner dead)");
                self.store.remove_primary(entry.id(), kind)?;
            }
        }
        Ok(live)
    }

    /// Liveness is keyed on the pane for tmux-mode prompt markers, on the
    /// pid otherwise. An entry that declares no owner is never reaped.
    fn owner_alive(&self, entry: &PendingEntry) -> bool {
        match entry {
            PendingEntry::PermissionRequest(req) => req
                .pid
                .is_none_or(|pid| self.liveness.process_alive(pid)),
            PendingEntry::PromptWaiting(waiting) => {
                if waiting.tmux_mode {
                    waiting
                        .tmux_pane
                        .as_deref()
                        .filter(|pane| !pane.is_empty())
                        .is_none_or(|pane| self.liveness.pane_alive(pane))
                } else {
                    waiting
                        .pid
                        .is_none_or(|pid| self.liveness.process_alive(pid))
                }
            }
        }
    }

    /// Record an operator decision for a permission request.
    ///
    /// `always` additionally persists the allow-pattern(s) — explicit
    /// override patterns from the call win over the ones stored in the
    /// request — and is recorded on the wire as `allow`.
    pub async fn respond(&self, params: RespondParams) -> Result<DecisionResponse> {
        let RespondParams {
            id,
            decision,
            message,
            allow_pattern,
            allow_patterns,
        } = params;

        let mut response = match decision {
            Decision::Allow => DecisionResponse::allow(),
            Decision::Deny => DecisionResponse::deny(),
            Decision::Always => {
                let applied =
                    self.persist_always_patterns(&id, allow_pattern, allow_patterns)?;
                DecisionResponse {
                    decision: Verdict::Allow,
                    message: None,
                    applied_patterns: Some(applied),
                }
            }
        };
        response.message = message;

        self.store
            .write_response(&id, EntryKind::PermissionRequest, &response)
            .await?;
        info!(id, decision = ?decision, "Recorded permission decision");
        Ok(response)
    }

    /// Resolve the pattern set for an `always` decision and append it to
    /// the request's settings file. A garbled primary or a failing settings
    /// write must not block the approval itself, so both degrade to a
    /// warning.
    fn persist_always_patterns(
        &self,
        id: &str,
        override_pattern: Option<String>,
        override_patterns: Option<Vec<String>>,
    ) -> Result<Vec<String>> {
        let request = match self.store.read_request(id) {
            Ok(request) => Some(request),
            Err(Error::MalformedEntry { path, source }) => {
                warn!(id, path = %path.display(), error = %source,
                    "Request unreadable; approving without settings update");
                None
            }
            Err(e) => return Err(e),
        };

        let patterns = override_patterns
            .filter(|patterns| !patterns.is_empty())
            .or_else(|| override_pattern.map(|pattern| vec![pattern]))
            .or_else(|| request.as_ref().map(|req| req.stored_patterns()))
            .unwrap_or_default();

        let Some(settings_file) = request.as_ref().and_then(|req| req.settings_file.clone())
        else {
            return Ok(settings::normalize_patterns(&patterns));
        };

        match settings::append_allow_patterns(&settings_file, &patterns) {
            Ok(applied) => Ok(applied),
            Err(e) => {
                warn!(id, path = %settings_file.display(), error = %e,
                    "Failed to update allow-list; approving anyway");
                Ok(settings::normalize_patterns(&patterns))
            }
        }
    }

    /// Register a session auto-allow rule and approve the request that
    /// prompted it, if it is still unanswered. The rule stays registered
    /// even when the entry vanished (reaped) or was resolved concurrently;
    /// it governs every future matching request either way.
    pub async fn session_allow(&self, id: &str, session_id: &str, tool_name: &str) -> Result<()> {
        if !session_id.is_empty() && !tool_name.is_empty() {
            let newly = self.rules.register(session_id, tool_name).await;
            if newly {
                info!(session_id, tool_name, "Session auto-allow registered");
            }
        }
        match self
            .store
            .write_response(id, EntryKind::PermissionRequest, &DecisionResponse::allow())
            .await
        {
            Ok(()) => info!(id, "Approved with session rule"),
            Err(Error::AlreadyResolved { .. } | Error::NotFound { .. }) => {
                info!(id, "Triggering entry already settled; rule registered");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Clear the session's auto-allow rules, deny its pending permission
    /// requests (so blocked requesters exit promptly), and dismiss its
    /// prompt-waiting markers. Entries of other sessions are untouched.
    pub async fn reset_session(&self, session_id: &str, source: &str) -> Result<SessionReset> {
        let mut outcome = SessionReset {
            rules_cleared: self.rules.clear_session(session_id).await,
            ..SessionReset::default()
        };

        for entry in self.store.list_primary(EntryKind::PermissionRequest)? {
            if entry.session_id() != session_id {
                continue;
            }
            let response = DecisionResponse::deny().with_message("Session reset");
            match self
                .store
                .write_response(entry.id(), EntryKind::PermissionRequest, &response)
                .await
            {
                Ok(()) => outcome.requests_denied += 1,
                Err(Error::AlreadyResolved { .. } | Error::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        for entry in self.store.list_primary(EntryKind::PromptWaiting)? {
            if entry.session_id() != session_id {
                continue;
            }
            match self
                .store
                .write_response(entry.id(), EntryKind::PromptWaiting, &PromptResponse::Dismiss)
                .await
            {
                Ok(()) => outcome.prompts_dismissed += 1,
                Err(Error::AlreadyResolved { .. } | Error::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        info!(
            session_id,
            source,
            rules_cleared = outcome.rules_cleared,
            requests_denied = outcome.requests_denied,
            prompts_dismissed = outcome.prompts_dismissed,
            "Session reset"
        );
        Ok(outcome)
    }

    /// Remove every file of the session outright, both kinds, answered or
    /// not: nothing is expected to still be polling. Returns how many files
    /// were deleted.
    pub async fn end_session(&self, session_id: &str) -> Result<usize> {
        self.rules.clear_session(session_id).await;

        let mut deleted = 0;
        for kind in [EntryKind::PermissionRequest, EntryKind::PromptWaiting] {
            for entry in self.store.list_all(kind)? {
                if entry.session_id() == session_id {
                    deleted += self.store.remove_pair(entry.id(), kind)?;
                }
            }
        }

        info!(session_id, deleted, "Session ended");
        Ok(deleted)
    }

    /// Deliver the operator's next instruction to a waiting requester.
    ///
    /// Tmux-mode markers have no polling requester: delivery is keystroke
    /// injection, and on success the waiting marker itself is deleted (no
    /// response file is ever written, and injection failure leaves the
    /// marker for a retry). File-mode markers get a response file and keep
    /// their primary for the requester to clean up.
    pub async fn submit_prompt(&self, id: &str, text: &str) -> Result<()> {
        match self.read_waiting_lenient(id)? {
            Some(waiting) if waiting.tmux_mode => {
                let pane = waiting
                    .tmux_pane
                    .as_deref()
                    .filter(|pane| !pane.is_empty())
                    .ok_or_else(|| {
                        Error::Injection(format!(
                            "prompt-waiting entry {id} declares tmux_mode without a pane"
                        ))
                    })?;
                self.injector.send_prompt(pane, text).await?;
                self.store.remove_primary(id, EntryKind::PromptWaiting)?;
                info!(id, pane, "Prompt delivered via tmux");
            }
            _ => {
                let response = PromptResponse::Submit {
                    prompt: text.to_string(),
                };
                self.store
                    .write_response(id, EntryKind::PromptWaiting, &response)
                    .await?;
                info!(id, "Prompt response written");
            }
        }
        Ok(())
    }

    /// Dismiss a waiting marker without sending anything.
    pub async fn dismiss_prompt(&self, id: &str) -> Result<()> {
        match self.read_waiting_lenient(id)? {
            Some(waiting) if waiting.tmux_mode => {
                self.store.remove_primary(id, EntryKind::PromptWaiting)?;
            }
            _ => {
                self.store
                    .write_response(id, EntryKind::PromptWaiting, &PromptResponse::Dismiss)
                    .await?;
            }
        }
        info!(id, "Prompt dismissed");
        Ok(())
    }

    /// A garbled waiting marker still identifies a requester that is
    /// polling a response file, so treat it as file-mode rather than
    /// refusing to answer.
    fn read_waiting_lenient(
        &self,
        id: &str,
    ) -> Result<Option<gatehouse_core::entry::PromptWaiting>> {
        match self.store.read_prompt_waiting(id) {
            Ok(waiting) => Ok(Some(waiting)),
            Err(Error::MalformedEntry { path, source }) => {
                warn!(id, path = %path.display(), error = %source,
                    "Waiting marker unreadable; assuming file-mode requester");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
