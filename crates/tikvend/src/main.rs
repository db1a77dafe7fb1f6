//! Voucher lifecycle daemon: loads the config, registers the device
//! inventory, then runs the reconciliation jobs until ctrl-c.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tikvend_core::{
    MemoryCredentialStore, MemoryStore, Reconciler, RosDeviceControl, SessionLedger, VoucherEngine,
};

#[derive(Debug, Parser)]
#[command(name = "tikvend", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "tikvend.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = tikvend_config::load(&cli.config)?;
    info!(path = %cli.config.display(), devices = config.devices.len(), "configuration loaded");

    let engine = VoucherEngine::new(
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(RosDeviceControl::default()),
        Arc::new(MemoryStore::new()),
        Arc::new(SessionLedger::new()),
        config.engine_config(),
    );

    // Device registration is best-effort at startup: an unreachable
    // router gets its NAS row and record either way, and the policy
    // push retries on the next restart.
    for entry in &config.devices {
        let record = entry.to_record();
        if let Err(err) = engine.on_device_registered(record).await {
            warn!(device = %entry.id, %err, "device registration incomplete");
        }
    }

    let reconciler = Arc::new(Reconciler::new(engine, config.scheduler_config()));
    let handle = reconciler.spawn();
    info!("reconciliation jobs started");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, draining jobs");
    handle.shutdown().await;
    Ok(())
}
