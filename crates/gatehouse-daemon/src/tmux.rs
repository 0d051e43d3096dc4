//! Prompt injection into a live tmux pane.
//!
//! Delivery is three sequential tmux calls: load the text into the paste
//! buffer from stdin, paste it into the target pane (deleting the buffer),
//! then send an Enter keystroke to submit. Each step runs under a bounded
//! timeout; any failure fails the whole submit, because a half-delivered
//! prompt must not consume the waiting marker.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use gatehouse_core::{Error, Result};

/// Injects operator prompts into tmux panes.
#[derive(Debug, Clone, Copy)]
pub struct TmuxInjector {
    step_timeout: Duration,
}

impl Default for TmuxInjector {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(5),
        }
    }
}

impl TmuxInjector {
    pub const fn new(step_timeout: Duration) -> Self {
        Self { step_timeout }
    }

    /// Deliver `text` to `pane` and submit it.
    pub async fn send_prompt(&self, pane: &str, text: &str) -> Result<()> {
        self.load_buffer(text).await?;
        self.paste_buffer(pane).await?;
        self.send_enter(pane).await?;
        debug!(pane, bytes = text.len(), "Prompt injected into tmux pane");
        Ok(())
    }

    /// `tmux load-buffer -` with the prompt on stdin, so arbitrary text
    /// needs no shell quoting.
    async fn load_buffer(&self, text: &str) -> Result<()> {
        let mut child = Command::new("tmux")
            .args(["load-buffer", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(map_spawn_error)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
            drop(stdin);
        }

        let status = tokio::time::timeout(self.step_timeout, child.wait())
            .await
            .map_err(|_| Error::Injection("tmux load-buffer timed out".to_string()))??;
        if !status.success() {
            return Err(Error::Injection(format!(
                "tmux load-buffer exited with {status}"
            )));
        }
        Ok(())
    }

    /// Paste into the target pane, deleting the buffer afterwards.
    async fn paste_buffer(&self, pane: &str) -> Result<()> {
        self.run_step(&["paste-buffer", "-t", pane, "-d"], "paste-buffer")
            .await
    }

    /// Submit the pasted text.
    async fn send_enter(&self, pane: &str) -> Result<()> {
        self.run_step(&["send-keys", "-t", pane, "Enter"], "send-keys")
            .await
    }

    async fn run_step(&self, args: &[&str], step: &str) -> Result<()> {
        let mut child = Command::new("tmux")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(map_spawn_error)?;

        let status = tokio::time::timeout(self.step_timeout, child.wait())
            .await
            .map_err(|_| Error::Injection(format!("tmux {step} timed out")))??;
        if !status.success() {
            return Err(Error::Injection(format!("tmux {step} exited with {status}")));
        }
        Ok(())
    }
}

fn map_spawn_error(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::ToolUnavailable {
            tool: "tmux".to_string(),
        }
    } else {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Whatever the environment (tmux missing, or installed with no such
    /// pane), injecting into a nonexistent pane must fail rather than
    /// silently succeed.
    #[tokio::test]
    async fn injecting_into_nonexistent_pane_fails() {
        let injector = TmuxInjector::default();
        let result = injector
            .send_prompt("%gatehouse-no-such-pane", "hello")
            .await;
        assert!(result.is_err());
    }
}
