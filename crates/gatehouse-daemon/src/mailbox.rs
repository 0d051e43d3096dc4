//! The shared mailbox directory.
//!
//! Requesters and the daemon coordinate exclusively through this flat
//! namespace of small JSON files; neither side edits a file the other
//! wrote. Every write lands as one atomic rename of a complete payload,
//! so "does a response exist" is a safe cross-process existence check and
//! a reader can never observe a half-written (or zero-length) file.
//!
//! Response creation is additionally serialized behind an async mutex:
//! the HTTP intake path and the auto-allow sweep live in the same process
//! and must never both answer the same entry.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use gatehouse_core::entry::{EntryKind, PendingEntry, PermissionRequest, PromptWaiting};
use gatehouse_core::{Error, Result};

/// Handle to the mailbox directory.
pub struct MailboxStore {
    dir: PathBuf,
    response_lock: Mutex<()>,
}

impl MailboxStore {
    /// Open (creating if needed) the mailbox at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            response_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the primary file for `id`.
    pub fn primary_path(&self, id: &str, kind: EntryKind) -> PathBuf {
        self.dir.join(format!("{id}{}", kind.primary_suffix()))
    }

    /// Path of the response file for `id`.
    pub fn response_path(&self, id: &str, kind: EntryKind) -> PathBuf {
        self.dir.join(format!("{id}{}", kind.response_suffix()))
    }

    pub fn primary_exists(&self, id: &str, kind: EntryKind) -> bool {
        self.primary_path(id, kind).exists()
    }

    pub fn response_exists(&self, id: &str, kind: EntryKind) -> bool {
        self.response_path(id, kind).exists()
    }

    /// Enumerate primary entries of `kind` whose response does not exist
    /// yet, in file-name order (stable oldest-first for sortable id
    /// schemes, deterministic always). Unparsable files are skipped and
    /// left in place: the garbled write may be the requester's, and
    /// deleting it would hide that.
    pub fn list_primary(&self, kind: EntryKind) -> Result<Vec<PendingEntry>> {
        self.enumerate(kind, false)
    }

    /// Enumerate every primary entry of `kind`, answered or not. Used for
    /// whole-session cleanup.
    pub fn list_all(&self, kind: EntryKind) -> Result<Vec<PendingEntry>> {
        self.enumerate(kind, true)
    }

    fn enumerate(&self, kind: EntryKind, include_answered: bool) -> Result<Vec<PendingEntry>> {
        let mut entries = Vec::new();
        for id in self.primary_ids(kind)? {
            if !include_answered && self.response_exists(&id, kind) {
                continue;
            }
            match self.read_entry(&id, kind) {
                Ok(entry) => entries.push(entry),
                Err(Error::MalformedEntry { path, source }) => {
                    warn!(path = %path.display(), error = %source, "Skipping malformed mailbox entry");
                }
                // Deleted between enumeration and read; nothing to surface.
                Err(Error::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }

    /// Ids of all primary files of `kind`, sorted by file name.
    fn primary_ids(&self, kind: EntryKind) -> Result<Vec<String>> {
        let suffix = kind.primary_suffix();
        let mut ids = Vec::new();
        for dir_entry in std::fs::read_dir(&self.dir)? {
            let name = dir_entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(id) = name.strip_suffix(suffix) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Read and parse the primary file for `id`.
    pub fn read_entry(&self, id: &str, kind: EntryKind) -> Result<PendingEntry> {
        validate_id(id)?;
        let path = self.primary_path(id, kind);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound { id: id.to_string() });
            }
            Err(e) => return Err(e.into()),
        };
        match kind {
            EntryKind::PermissionRequest => PermissionRequest::from_json_str(&raw)
                .map(PendingEntry::PermissionRequest)
                .map_err(|source| Error::MalformedEntry { path, source }),
            EntryKind::PromptWaiting => PromptWaiting::from_json_str(&raw)
                .map(PendingEntry::PromptWaiting)
                .map_err(|source| Error::MalformedEntry { path, source }),
        }
    }

    /// Read the primary file for `id` as a permission request.
    pub fn read_request(&self, id: &str) -> Result<PermissionRequest> {
        match self.read_entry(id, EntryKind::PermissionRequest)? {
            PendingEntry::PermissionRequest(req) => Ok(req),
            PendingEntry::PromptWaiting(_) => Err(Error::NotFound { id: id.to_string() }),
        }
    }

    /// Read the primary file for `id` as a prompt-waiting marker.
    pub fn read_prompt_waiting(&self, id: &str) -> Result<PromptWaiting> {
        match self.read_entry(id, EntryKind::PromptWaiting)? {
            PendingEntry::PromptWaiting(waiting) => Ok(waiting),
            PendingEntry::PermissionRequest(_) => Err(Error::NotFound { id: id.to_string() }),
        }
    }

    /// Create the response file for `id`.
    ///
    /// Exactly one caller can ever succeed: a pre-existing response yields
    /// [`Error::AlreadyResolved`] and the original file is untouched; a
    /// missing primary yields [`Error::NotFound`] (a response must never be
    /// fabricated for an entry that was reaped or never existed).
    pub async fn write_response<T: Serialize>(
        &self,
        id: &str,
        kind: EntryKind,
        payload: &T,
    ) -> Result<()> {
        validate_id(id)?;
        let _guard = self.response_lock.lock().await;

        let response = self.response_path(id, kind);
        if response.exists() {
            return Err(Error::AlreadyResolved { id: id.to_string() });
        }
        if !self.primary_exists(id, kind) {
            return Err(Error::NotFound { id: id.to_string() });
        }

        let bytes = serde_json::to_vec(payload)?;
        self.persist_atomic(&response, &bytes, id)?;
        debug!(id, path = %response.display(), "Wrote response file");
        Ok(())
    }

    /// Write `bytes` to `path` via a dot-prefixed temp file and a
    /// no-clobber rename. The dot prefix keeps in-flight writes out of
    /// enumeration; the no-clobber rename backstops single resolution even
    /// if a second operator process were ever pointed at this mailbox.
    fn persist_atomic(&self, path: &Path, bytes: &[u8], id: &str) -> Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".gatehouse-tmp")
            .tempfile_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        match tmp.persist_noclobber(path) {
            Ok(_) => Ok(()),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::AlreadyResolved { id: id.to_string() })
            }
            Err(e) => Err(Error::Io(e.error)),
        }
    }

    /// Delete the primary file for `id` (liveness reaping, tmux-mode prompt
    /// delivery, session-end cleanup). Idempotent: a file already gone is
    /// not an error. Returns whether a file was actually removed.
    pub fn remove_primary(&self, id: &str, kind: EntryKind) -> Result<bool> {
        validate_id(id)?;
        remove_if_present(&self.primary_path(id, kind))
    }

    /// Delete both files of the pair for `id`, returning how many existed.
    pub fn remove_pair(&self, id: &str, kind: EntryKind) -> Result<usize> {
        validate_id(id)?;
        let mut removed = 0;
        if remove_if_present(&self.primary_path(id, kind))? {
            removed += 1;
        }
        if remove_if_present(&self.response_path(id, kind))? {
            removed += 1;
        }
        Ok(removed)
    }
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Entry ids become file names; reject anything that would escape the
/// mailbox directory or collide with temp files.
fn validate_id(id: &str) -> Result<()> {
    let bad = id.is_empty()
        || id.starts_with('.')
        || id.contains('/')
        || id.contains('\\')
        || id.contains("..");
    if bad {
        return Err(Error::InvalidId { id: id.to_string() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::entry::DecisionResponse;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, MailboxStore) {
        let dir = TempDir::new().unwrap();
        let store = MailboxStore::open(dir.path()).unwrap();
        (dir, store)
    }

    /// Simulate a requester hook dropping a request file.
    fn seed_request(store: &MailboxStore, id: &str, session_id: &str) {
        let payload = json!({
            "id": id,
            "session_id": session_id,
            "tool_name": "Bash",
            "tool_input": {"command": "ls"},
            "pid": std::process::id(),
        });
        std::fs::write(
            store.primary_path(id, EntryKind::PermissionRequest),
            serde_json::to_vec(&payload).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn lists_entries_in_filename_order() {
        let (_dir, store) = store();
        seed_request(&store, "b-2", "s1");
        seed_request(&store, "a-1", "s1");
        seed_request(&store, "c-3", "s1");

        let entries = store.list_primary(EntryKind::PermissionRequest).unwrap();
        let ids: Vec<&str> = entries.iter().map(PendingEntry::id).collect();
        assert_eq!(ids, ["a-1", "b-2", "c-3"]);
    }

    #[tokio::test]
    async fn answered_entries_are_not_listed() {
        let (_dir, store) = store();
        seed_request(&store, "r1", "s1");
        seed_request(&store, "r2", "s1");

        store
            .write_response("r1", EntryKind::PermissionRequest, &DecisionResponse::allow())
            .await
            .unwrap();

        let entries = store.list_primary(EntryKind::PermissionRequest).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id(), "r2");

        // list_all still sees both.
        assert_eq!(store.list_all(EntryKind::PermissionRequest).unwrap().len(), 2);
    }

    #[test]
    fn malformed_entries_are_skipped_and_left_in_place() {
        let (_dir, store) = store();
        seed_request(&store, "good", "s1");
        let bad = store.primary_path("bad", EntryKind::PermissionRequest);
        std::fs::write(&bad, "{not json").unwrap();

        let entries = store.list_primary(EntryKind::PermissionRequest).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id(), "good");
        assert!(bad.exists());
    }

    #[test]
    fn temp_files_are_invisible_to_enumeration() {
        let (_dir, store) = store();
        std::fs::write(
            store.dir().join(".gatehouse-tmp1234.request.json"),
            "{}",
        )
        .unwrap();

        assert!(store.list_primary(EntryKind::PermissionRequest).unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_response_write_is_rejected() {
        let (_dir, store) = store();
        seed_request(&store, "r1", "s1");

        store
            .write_response("r1", EntryKind::PermissionRequest, &DecisionResponse::allow())
            .await
            .unwrap();
        let err = store
            .write_response("r1", EntryKind::PermissionRequest, &DecisionResponse::deny())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyResolved { .. }));

        // First writer's content survives.
        let raw =
            std::fs::read_to_string(store.response_path("r1", EntryKind::PermissionRequest))
                .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["decision"], "allow");
    }

    #[tokio::test]
    async fn response_requires_a_primary_file() {
        let (_dir, store) = store();
        let err = store
            .write_response("ghost", EntryKind::PermissionRequest, &DecisionResponse::deny())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(!store.response_exists("ghost", EntryKind::PermissionRequest));
    }

    #[tokio::test]
    async fn remove_pair_deletes_both_files() {
        let (_dir, store) = store();
        seed_request(&store, "r1", "s1");
        store
            .write_response("r1", EntryKind::PermissionRequest, &DecisionResponse::allow())
            .await
            .unwrap();

        assert_eq!(store.remove_pair("r1", EntryKind::PermissionRequest).unwrap(), 2);
        assert!(!store.primary_exists("r1", EntryKind::PermissionRequest));
        assert!(!store.response_exists("r1", EntryKind::PermissionRequest));
        // Idempotent.
        assert_eq!(store.remove_pair("r1", EntryKind::PermissionRequest).unwrap(), 0);
    }

    #[test]
    fn hostile_ids_are_rejected() {
        let (_dir, store) = store();
        for id in ["", "..", "a/b", "a\\b", ".hidden"] {
            assert!(matches!(
                store.remove_primary(id, EntryKind::PermissionRequest),
                Err(Error::InvalidId { .. })
            ));
        }
    }
}
