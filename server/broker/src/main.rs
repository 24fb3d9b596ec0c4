use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use tb_broker::{config, logging, service};

#[derive(Parser, Debug)]
#[command(name = "tb-broker", about = "Multi-UAV telemetry broker")]
struct Args {
    /// Path to the service config; when omitted the working directory, the
    /// executable directory and its parent are searched for
    /// service_config.json.
    #[arg(long, env = "SERVICE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let path = config::resolve_path(args.config.as_deref())?;
    let cfg = config::Config::load(&path)
        .with_context(|| format!("load config {}", path.display()))?;

    let log_path = config::resolve_log_path(&cfg.log_file);
    let _guard = logging::init(&log_path);
    info!("starting telemetry broker with config {}", path.display());

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = stop_tx.send(true);
    });

    service::run(cfg, stop_rx).await
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
