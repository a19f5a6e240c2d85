mod applier;
mod channel;
mod config;
mod error;
mod event;
mod keyboard;
mod live_config;
mod paths;
mod privilege;
mod process_list;
mod processor;
mod source;
mod startup;
mod status;
mod tracker;

#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::applier::SettingsApplier;
use crate::keyboard::SystemKeyboard;
use crate::live_config::{ConfigPort, LiveConfig};
use crate::process_list::SystemSnapshot;
use crate::processor::Processor;
use crate::source::{EventSource, PollingSource, SecurityLogSource, DEFAULT_POLL_INTERVAL_MS};
use crate::status::StatusBoard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Windows Security event log (needs elevation and process auditing).
    SecurityLog,
    /// Periodic process-list polling.
    Poll,
}

#[derive(Parser, Debug)]
#[command(name = "repeatswitch-daemon", version)]
#[command(about = "Switches keyboard repeat rate while a watched process is running")]
struct Args {
    /// Config file path [default: %APPDATA%\RepeatSwitch\appsettings.json]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Where process start/stop notifications come from
    #[arg(long, value_enum, default_value_t = default_source())]
    source: SourceKind,

    /// Poll period for `--source poll`, at least 100 ms
    #[arg(
        long,
        default_value_t = DEFAULT_POLL_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(100..)
    )]
    poll_interval_ms: u64,

    /// Start the daemon at login and exit
    #[arg(long, conflicts_with = "unregister_startup")]
    register_startup: bool,

    /// Remove the login entry and exit
    #[arg(long)]
    unregister_startup: bool,
}

fn default_source() -> SourceKind {
    if cfg!(windows) {
        SourceKind::SecurityLog
    } else {
        SourceKind::Poll
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    // ── Login registration ────────────────────────────────────────────────────
    if args.register_startup {
        return startup::register_startup(args.config.as_deref());
    }
    if args.unregister_startup {
        return startup::unregister_startup();
    }

    info!("repeatswitch-daemon v{} starting", env!("CARGO_PKG_VERSION"));

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = args.config.clone().unwrap_or_else(paths::config_file_path);
    let initial = config::load(&config_path)
        .with_context(|| format!("Cannot start without a valid config ({})", config_path.display()))?;
    info!(
        path = %config_path.display(),
        process = %initial.process_monitor.process_name,
        "config loaded"
    );

    if args.source == SourceKind::SecurityLog && !privilege::is_elevated() {
        warn!("not running elevated; the Security event log will likely be unreadable");
    }

    // ── Components ────────────────────────────────────────────────────────────
    let live = Arc::new(LiveConfig::new(initial));
    let applier = Arc::new(SettingsApplier::new(
        Box::new(SystemKeyboard),
        Arc::clone(&live),
    ));
    let source: Box<dyn EventSource> = match args.source {
        SourceKind::SecurityLog => Box::new(SecurityLogSource::new(Arc::clone(&live))),
        SourceKind::Poll => Box::new(PollingSource::new(
            Arc::clone(&live),
            Duration::from_millis(args.poll_interval_ms),
        )),
    };
    let board = Arc::new(StatusBoard::new(
        paths::status_file_path(),
        live.snapshot().process_monitor.process_name.clone(),
    ));
    let processor = Processor::new(
        Arc::clone(&live),
        Arc::clone(&applier),
        Box::new(SystemSnapshot::new()),
        source,
    )
    .with_status(Arc::clone(&board));

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(
        config_path,
        ConfigPort::new(Arc::clone(&live), Arc::clone(&applier)).with_status(board),
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    let processor = tokio::spawn(processor.run(stop_rx));

    // Graceful shutdown on Ctrl+C.
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => error!("failed to wait for Ctrl+C, shutting down: {e}"),
    }
    let _ = stop_tx.send(true);

    let summary = processor.await.context("processor task failed")?;
    info!(
        processed = summary.processed,
        drained = summary.drained,
        tracked = summary.final_count,
        degraded = summary.degraded,
        "stopped"
    );
    Ok(())
}

fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();

    Ok(())
}
