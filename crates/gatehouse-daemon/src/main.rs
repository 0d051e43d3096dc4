//! Gatehouse Daemon
//!
//! Long-running operator side of the mailbox protocol: watches the shared
//! mailbox directory, sweeps auto-allow rules in the background, and serves
//! the JSON data-plane the operator UI polls.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use gatehouse_daemon::approval::{ApprovalService, AutoAllowCache, spawn_sweep_task};
use gatehouse_daemon::liveness::SystemLiveness;
use gatehouse_daemon::mailbox::MailboxStore;
use gatehouse_daemon::server;
use gatehouse_daemon::tmux::TmuxInjector;

#[derive(Parser, Debug)]
#[command(name = "gatehouse-daemon")]
#[command(version, about = "Gatehouse daemon - operator approvals over a shared mailbox")]
struct Args {
    /// TCP bind address (overrides the configured port)
    #[arg(long, env = "GATEHOUSE_ADDR")]
    addr: Option<SocketAddr>,

    /// Mailbox directory shared with requester hooks
    #[arg(long, env = "GATEHOUSE_MAILBOX_DIR")]
    mailbox_dir: Option<PathBuf>,

    /// Auto-allow sweep period in milliseconds
    #[arg(long, env = "GATEHOUSE_SWEEP_INTERVAL_MS")]
    sweep_interval_ms: Option<u64>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, env = "GATEHOUSE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "GATEHOUSE_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = gatehouse_core::config::load_config(None)?;

    let log_level = args
        .log_level
        .unwrap_or_else(|| config.daemon.log_level.clone());
    let log_filter = format!("gatehouse_daemon={log_level},gatehouse_core={log_level}");
    gatehouse_core::tracing_init::init_tracing(&log_filter, args.log_json || config.daemon.log_json);

    let addr = args.addr.unwrap_or_else(|| {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), config.daemon.port)
    });
    let mailbox_dir = args
        .mailbox_dir
        .or_else(|| config.mailbox.dir.clone())
        .unwrap_or_else(gatehouse_core::config::default_mailbox_dir);
    let sweep_interval =
        Duration::from_millis(args.sweep_interval_ms.unwrap_or(config.mailbox.sweep_interval_ms));
    let probe_timeout = Duration::from_secs(config.mailbox.probe_timeout_secs);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %addr,
        mailbox = %mailbox_dir.display(),
        sweep_ms = sweep_interval.as_millis() as u64,
        "Starting gatehouse-daemon"
    );

    let store = Arc::new(MailboxStore::open(&mailbox_dir)?);
    let rules = Arc::new(AutoAllowCache::new());
    let service = Arc::new(ApprovalService::new(
        Arc::clone(&store),
        Arc::clone(&rules),
        Arc::new(SystemLiveness),
        TmuxInjector::new(probe_timeout),
    ));

    // Daemon-level shutdown channel (triggered by Ctrl+C or SIGTERM)
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweep_handle = spawn_sweep_task(rules, store, sweep_interval, shutdown_rx);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Notify systemd that the daemon is ready to serve (unix only).
    // The `true` parameter unsets $NOTIFY_SOCKET so any child processes
    // don't accidentally notify systemd.
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    info!(addr = %addr, "Data-plane ready");

    axum::serve(listener, server::router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = sweep_handle.await;

    info!("Daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C shutdown signal");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM shutdown signal");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C shutdown signal");
    }
}
