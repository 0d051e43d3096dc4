//! Configuration resolution for Gatehouse.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/gatehouse/settings.json)
//! 3. Project config (.gatehouse/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete Gatehouse configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub mailbox: MailboxConfig,
}

/// Daemon-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// TCP port of the JSON data-plane.
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 19836,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

/// Mailbox coordination configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Mailbox directory shared with requester hooks. Defaults to
    /// `<tmpdir>/gatehouse-mailbox` when unset.
    pub dir: Option<PathBuf>,
    /// Period of the background auto-allow sweep, in milliseconds.
    pub sweep_interval_ms: u64,
    /// Timeout for external liveness/injection probes, in seconds.
    pub probe_timeout_secs: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            dir: None,
            sweep_interval_ms: 500,
            probe_timeout_secs: 5,
        }
    }
}

impl MailboxConfig {
    /// The effective mailbox directory.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(default_mailbox_dir)
    }
}

/// Default mailbox directory: `<tmpdir>/gatehouse-mailbox`.
///
/// Deliberately under the system temp dir so requester hooks spawned by
/// arbitrary tooling can find it without configuration.
pub fn default_mailbox_dir() -> PathBuf {
    std::env::temp_dir().join("gatehouse-mailbox")
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            let global = load_config_file(&global_path)?;
            merge_config(&mut config, global);
        }
    }

    if let Some(dir) = project_dir {
        let project_path = dir.join(".gatehouse").join("settings.json");
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
        }
    }

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".gatehouse").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/gatehouse/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("gatehouse").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    base.daemon = overlay.daemon;
    if overlay.mailbox.dir.is_some() {
        base.mailbox.dir = overlay.mailbox.dir;
    }
    base.mailbox.sweep_interval_ms = overlay.mailbox.sweep_interval_ms;
    base.mailbox.probe_timeout_secs = overlay.mailbox.probe_timeout_secs;
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("GATEHOUSE_PORT") {
        if let Ok(n) = val.parse() {
            config.daemon.port = n;
        }
    }
    if let Ok(val) = std::env::var("GATEHOUSE_LOG_LEVEL") {
        config.daemon.log_level = val;
    }
    if let Ok(val) = std::env::var("GATEHOUSE_MAILBOX_DIR") {
        config.mailbox.dir = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("GATEHOUSE_SWEEP_INTERVAL_MS") {
        if let Ok(n) = val.parse() {
            config.mailbox.sweep_interval_ms = n;
        }
    }
}
