//! Entry point for the `kvd` key/value server.

mod acceptor;
mod config;
mod connection;
mod dispatcher;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use signals::Shutdown;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Networked key/value store with on-disk snapshotting")]
struct Args {
    /// Path to a YAML config file. If omitted, built-in defaults are used.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Override the configured bind address (host:port).
    #[clap(long)]
    bind: Option<String>,

    /// Override the configured snapshot file path.
    #[clap(long)]
    snapshot_path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error(transparent)]
    Store(#[from] kv_store::Error),
    #[error(transparent)]
    Acceptor(#[from] acceptor::Error),
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_ansi(false)
        .init();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "kvd exited with an error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Error> {
    info!("starting kvd");
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    if let Some(snapshot_path) = args.snapshot_path {
        config.snapshot_path = snapshot_path;
    }

    let bind_addr = config.bind_addr(args.bind.as_deref())?;
    let store = Arc::new(kv_store::Store::open(config.snapshot_path.clone())?);
    info!(keys = store.len(), "store opened");

    let (shutdown, watch) = Shutdown::new();
    let ctrl_c = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received");
        shutdown.trigger();
    });

    acceptor::run(bind_addr, store, &config, watch).await?;
    ctrl_c.abort();
    Ok(())
}
