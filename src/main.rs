//! Binary entry point for the outpost agent.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use outpost::agent::{Supervisor, SupervisorOptions};
use outpost::config::Config;
use outpost::coordinator::HttpCoordinator;
use outpost::logging;
use outpost::sandbox::SandboxRunner;
use outpost::tracker::ExecutionTracker;

#[derive(Debug, Parser)]
#[command(name = "outpost", about = "Persistent remote-execution agent", version)]
struct Cli {
    /// Override the coordinator base URL.
    #[arg(long)]
    coordinator_url: Option<String>,

    /// Override the log directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(url) = cli.coordinator_url {
        config.coordinator_url = url;
    }
    if let Some(dir) = cli.log_dir {
        config.log_dir = dir;
    }

    logging::init(&config.log_dir)?;
    tracing::info!(coordinator = %config.coordinator_url, "starting outpost agent");

    let gateway = Arc::new(HttpCoordinator::new(
        config.coordinator_url.clone(),
        config.token.clone(),
    ));
    let tracker = Arc::new(ExecutionTracker::new());
    let runner = Arc::new(SandboxRunner::new(config.sandbox.clone()));
    let supervisor = Supervisor::new(
        gateway,
        tracker,
        runner,
        SupervisorOptions {
            heartbeat_interval: config.heartbeat_interval,
            reconnect_backoff: config.reconnect_backoff,
        },
    );

    supervisor.run(shutdown_signal()).await;
    tracing::info!("agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        // Without a signal handler there is no clean way out; park rather
        // than shutting down a healthy agent.
        std::future::pending::<()>().await;
    }
}
