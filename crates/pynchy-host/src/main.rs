//! Binary entrypoint (§4.9 phase 0): init logging, load config (falling back
//! to defaults on a bad/missing file, same as the gateway binary this was
//! grounded on), dispatch a non-host subcommand if one was given, else start
//! the host and run until SIGTERM/SIGINT.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pynchy_core::config::{project_root, PynchyConfig};
use pynchy_host::cli::Cli;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// §4.9 "Shutdown": the grace window between the first signal and a forced
/// hard exit, in case a spawned task never notices the watch channel flip.
const SHUTDOWN_WATCHDOG_SECS: u64 = 12;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "pynchy_host=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();

    if pynchy_host::cli::dispatch(&cli, cli.config.as_deref()).await? {
        return Ok(());
    }

    let config = PynchyConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "config load failed, using defaults");
        PynchyConfig::default()
    });

    let data_root = std::path::PathBuf::from(project_root()).join("data");
    let host = match pynchy_host::Host::new(config, data_root) {
        Ok(host) => host,
        Err(e) => {
            error!(error = %e, "startup failed");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    install_signal_handlers(shutdown_tx);

    if let Err(e) = host.run(shutdown_rx).await {
        error!(error = %e, "host exited with error");
        std::process::exit(1);
    }

    info!("pynchy-host shut down cleanly");
    Ok(())
}

/// SIGTERM/SIGINT both trigger the same graceful shutdown path (§4.9
/// "Shutdown"): flip the watch channel on the first signal and arm a
/// 12-second watchdog that hard-exits if spawned tasks never notice it. A
/// second signal within that window skips the grace period entirely.
fn install_signal_handlers(shutdown_tx: Arc<watch::Sender<bool>>) {
    let signal_count = Arc::new(AtomicU32::new(0));

    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        let signal_count = signal_count.clone();
        async move {
            loop {
                let _ = tokio::signal::ctrl_c().await;
                handle_shutdown_signal("SIGINT", &shutdown_tx, &signal_count);
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        let signal_count = signal_count.clone();
        async move {
            let Ok(mut sigterm) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else { return };
            loop {
                sigterm.recv().await;
                handle_shutdown_signal("SIGTERM", &shutdown_tx, &signal_count);
            }
        }
    });
}

fn handle_shutdown_signal(name: &str, shutdown_tx: &watch::Sender<bool>, signal_count: &AtomicU32) {
    let count = signal_count.fetch_add(1, Ordering::SeqCst) + 1;
    if count >= 2 {
        warn!(signal = name, "second signal received, exiting immediately");
        std::process::exit(130);
    }

    info!(signal = name, watchdog_secs = SHUTDOWN_WATCHDOG_SECS, "received signal, shutting down");
    let _ = shutdown_tx.send(true);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(SHUTDOWN_WATCHDOG_SECS)).await;
        error!("shutdown watchdog expired, forcing exit");
        std::process::exit(1);
    });
}
