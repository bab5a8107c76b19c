//! Spectre agent
//!
//! Scans bridge contracts for `TeleportInitialized` events and writes them to
//! stdout as JSON lines.

mod config;
mod shutdown;

use clap::Parser;
use config::ConfigLoader;
use shutdown::shutdown_signal;
use spectre_core::chain::JsonRpcClient;
use spectre_core::events::{ScannedEventReceiver, scanned_event_channel};
use spectre_core::scanner::EventScanner;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

/// Spectre - bridge event scanner
#[derive(Parser, Debug)]
#[command(name = "spectre-agent")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./spectre.toml")]
    config: PathBuf,

    /// Override the JSON-RPC endpoint
    #[arg(long, env = "SPECTRE_RPC_URL")]
    rpc_url: Option<Url>,

    /// Skip the historical backfill and only follow new blocks
    #[arg(long, default_value = "false")]
    no_backfill: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting spectre-agent v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = ConfigLoader::new(&args.config, args.rpc_url, args.no_backfill);
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let client = Arc::new(JsonRpcClient::new(loaded_config.rpc_url.clone())?);
    tracing::info!(rpc_url = %loaded_config.rpc_url, "JSON-RPC client ready");

    let mut scanner = EventScanner::new(client, loaded_config.scanner)?;
    if !loaded_config.live {
        scanner = scanner.without_live_fetch();
    }
    if !loaded_config.backfill {
        scanner = scanner.without_backfill();
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (events_tx, events_rx) = scanned_event_channel();

    let scanner_handle = scanner.start(events_tx, shutdown_rx);
    let printer = tokio::spawn(print_events(events_rx));

    shutdown_signal().await?;

    shutdown_tx.send_replace(true);
    scanner_handle.join().await;

    // The scanner routines have exited and dropped their senders, so the
    // printer drains what is left and returns.
    printer.await??;

    tracing::info!("spectre-agent shutdown complete");
    Ok(())
}

/// Write each event as one JSON line on stdout.
async fn print_events(mut events_rx: ScannedEventReceiver) -> anyhow::Result<()> {
    let mut printed = 0u64;
    while let Some(event) = events_rx.recv().await {
        let line = serde_json::to_string(&event)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
        printed += 1;
    }
    tracing::debug!(printed, "Event stream closed");
    Ok(())
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,spectre_core=debug,reqwest=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
