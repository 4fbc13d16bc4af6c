//! Native-messaging host. The browser launches this process with the framed
//! channel on stdin/stdout; logs go to stderr and `logs/host.log`.

use anyhow::Context;
use browsermux_bridge::Bridge;
use browsermux_core::{Config, Paths, RegistryStore};
use clap::Parser;
use std::fs::{File, OpenOptions};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE: &str = "host.log";
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "browsermux-host")]
#[command(about = "Bridge between the browsermux CLI and the browser extension", long_about = None)]
#[command(version)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Arguments supplied by the browser: the caller's origin and, on some
    /// platforms, `--parent-window=<handle>`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    launch_args: Vec<String>,
}

impl Args {
    fn origin(&self) -> Option<&str> {
        self.launch_args
            .iter()
            .map(String::as_str)
            .find(|a| a.contains("://"))
    }

    fn parent_window(&self) -> Option<&str> {
        self.launch_args
            .iter()
            .find_map(|a| a.strip_prefix("--parent-window="))
    }
}

fn init_tracing(verbose: bool, json: bool, log_file: Option<File>) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // stdout carries frames; logs must never go there.
    let stderr_layer = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .boxed()
    };
    let file_layer = log_file.map(|f| fmt::layer().with_writer(Mutex::new(f)).with_ansi(false));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(filter)
        .init();
}

/// Browsers often discard a host's stderr, so also append to `logs/host.log`.
fn open_log_file(paths: &Paths) -> Option<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths.logs_dir().join(LOG_FILE))
        .ok()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    let result = runtime.block_on(run(args));
    // The stdin reader sits in a blocking read for as long as the browser
    // keeps the pipe open; do not wait for it.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

async fn run(args: Args) -> anyhow::Result<()> {
    let paths = Paths::new();
    let dirs_ready = paths.ensure_dirs();
    let log_file = dirs_ready.as_ref().ok().and_then(|_| open_log_file(&paths));
    init_tracing(args.verbose, args.json_logs, log_file);
    dirs_ready.with_context(|| format!("Failed to create {}", paths.base.display()))?;

    info!(
        pid = std::process::id(),
        origin = ?args.origin(),
        parent_window = ?args.parent_window(),
        "Native host started"
    );

    let config = Config::load_or_default(&paths).context("Failed to load config")?;

    match RegistryStore::from_paths(&paths).prune_stale() {
        Ok(pruned) if !pruned.is_empty() => info!(?pruned, "Pruned stale bridge entries"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Failed to prune bridge registry"),
    }

    // Exits non-zero here when the port range is exhausted.
    let bridge = Bridge::new(paths, config.bridge)
        .start(tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("Failed to start bridge")?;

    bridge.serve_until(shutdown_signal()).await?;
    info!("Native host exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_launch_args() {
        let args = Args::try_parse_from([
            "browsermux-host",
            "chrome-extension://abcdefgh/",
            "--parent-window=0",
        ])
        .unwrap();
        assert_eq!(args.origin(), Some("chrome-extension://abcdefgh/"));
        assert_eq!(args.parent_window(), Some("0"));
        assert!(!args.verbose);
    }

    #[test]
    fn test_firefox_launch_args() {
        let args = Args::try_parse_from([
            "browsermux-host",
            "-v",
            "/path/to/manifest.json",
            "browsermux@example.org",
        ])
        .unwrap();
        assert!(args.verbose);
        assert_eq!(args.origin(), None);
        assert_eq!(args.launch_args.len(), 2);
    }

    #[test]
    fn test_no_args() {
        let args = Args::try_parse_from(["browsermux-host"]).unwrap();
        assert!(args.launch_args.is_empty());
    }
}
