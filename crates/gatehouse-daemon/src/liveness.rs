//! Liveness probes for requester processes and tmux panes.
//!
//! Reaping an entry destroys it, so every probe fails toward "alive":
//! only a definitive "no such process" / "no such session" answer lets the
//! resolver delete a primary file.

use std::collections::HashSet;
use std::process::{Command, Stdio};

use tracing::debug;

/// Seam between the resolver and the operating system. The resolver only
/// ever asks yes/no questions; both probes are pure queries.
pub trait Liveness: Send + Sync {
    /// Whether the process `pid` still exists. "Permission denied" counts
    /// as alive: the process is there, we just cannot signal it.
    fn process_alive(&self, pid: u32) -> bool;

    /// Whether the tmux session/pane named by `pane` still exists. A probe
    /// that cannot run (tmux missing) answers "alive": unknown must not
    /// reap.
    fn pane_alive(&self, pane: &str) -> bool;
}

/// Probes backed by `kill(2)` and the `tmux` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLiveness;

impl Liveness for SystemLiveness {
    #[cfg(unix)]
    fn process_alive(&self, pid: u32) -> bool {
        // SAFETY: kill(2) with signal 0 performs only the existence and
        // permission checks; no signal is delivered.
        #[allow(unsafe_code)]
        #[allow(clippy::cast_possible_wrap)]
        let ret = unsafe { libc::kill(pid as i32, 0) };
        if ret == 0 {
            return true;
        }
        let errno = std::io::Error::last_os_error().raw_os_error();
        match errno {
            Some(code) if code == libc::ESRCH => false,
            // EPERM: exists but owned by someone else.
            _ => true,
        }
    }

    #[cfg(not(unix))]
    fn process_alive(&self, _pid: u32) -> bool {
        // No portable cheap probe here; never reap on guesswork.
        true
    }

    fn pane_alive(&self, pane: &str) -> bool {
        let status = Command::new("tmux")
            .args(["has-session", "-t", pane])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) => status.success(),
            Err(e) => {
                debug!(pane, error = %e, "tmux probe unavailable, assuming pane alive");
                true
            }
        }
    }
}

/// Fixed liveness table for tests: everything is alive unless explicitly
/// marked dead.
#[derive(Debug, Default)]
pub struct TableLiveness {
    dead_pids: HashSet<u32>,
    dead_panes: HashSet<String>,
}

impl TableLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_dead_pid(mut self, pid: u32) -> Self {
        self.dead_pids.insert(pid);
        self
    }

    #[must_use]
    pub fn with_dead_pane(mut self, pane: impl Into<String>) -> Self {
        self.dead_panes.insert(pane.into());
        self
    }
}

impl Liveness for TableLiveness {
    fn process_alive(&self, pid: u32) -> bool {
        !self.dead_pids.contains(&pid)
    }

    fn pane_alive(&self, pane: &str) -> bool {
        !self.dead_panes.contains(pane)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_alive() {
        assert!(SystemLiveness.process_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn reaped_child_is_dead() {
        let mut child = Command::new("true")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!SystemLiveness.process_alive(pid));
    }

    #[test]
    fn table_liveness_defaults_to_alive() {
        let liveness = TableLiveness::new().with_dead_pid(7).with_dead_pane("%3");
        assert!(liveness.process_alive(1));
        assert!(!liveness.process_alive(7));
        assert!(liveness.pane_alive("%1"));
        assert!(!liveness.pane_alive("%3"));
    }
}
