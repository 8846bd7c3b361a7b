//! Tether host - serves a project manifest to template workers.
//!
//! Usage:
//!   tether-host --manifest tether.toml                          # listen and watch
//!   tether-host --manifest tether.toml --spawn-worker tether-worker
//!   tether-host --manifest tether.toml --config host.toml --tick-ms 1000

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::thread;
use tether::config::{self, HostConfig};
use tether::host::{Host, ManifestWorkspace};
use tether::watcher::start_watching;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tether-host")]
#[command(about = "Keeps tether workers in sync with a project manifest", long_about = None)]
struct Cli {
    /// Project manifest (TOML)
    #[arg(short, long)]
    manifest: PathBuf,

    /// Host config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Launch this worker executable with `--port <port>` once listening
    #[arg(long)]
    spawn_worker: Option<PathBuf>,

    /// Override the tick interval in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config: HostConfig =
        config::load(cli.config.as_deref()).context("cannot load host config")?;
    if let Some(tick_ms) = cli.tick_ms {
        config.tick_interval_ms = tick_ms;
    }

    let workspace = Arc::new(
        ManifestWorkspace::load(&cli.manifest, config.metadata_command.clone())
            .with_context(|| format!("cannot load manifest {}", cli.manifest.display()))?,
    );

    let host = Host::start(workspace.clone(), &config)?;

    let synchronizer = Arc::clone(host.synchronizer());
    let _watcher = match start_watching(workspace, config.debounce_ms, move |kind| {
        synchronizer.on_change(kind)
    }) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "file watcher failed to start");
            None
        }
    };

    match cli.spawn_worker {
        Some(worker) => {
            info!(worker = %worker.display(), port = host.port(), "launching worker");
            let status = Command::new(&worker)
                .arg("--port")
                .arg(host.port().to_string())
                .status()
                .with_context(|| format!("cannot launch {}", worker.display()))?;
            info!(%status, "worker exited");
            host.stop();
        }
        None => {
            println!("listening on 127.0.0.1:{}", host.port());
            loop {
                thread::park();
            }
        }
    }

    Ok(())
}
