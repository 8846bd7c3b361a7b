//! Tether worker - regenerates and recompiles templates for a host.
//!
//! Usage:
//!   tether-worker --port <n>                 # connect to the host on 127.0.0.1:<n>
//!   tether-worker --port <n> --debug         # wait for a debugger before connecting
//!   tether-worker --port <n> --config w.toml # external generator/compiler commands

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use tether::config::{self, WorkerConfig};
use tether::worker;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tether-worker")]
#[command(about = "Template worker kept in sync by a tether host", long_about = None)]
struct Cli {
    /// Port of the host connection
    #[arg(short, long)]
    port: u16,

    /// Pause before connecting so a debugger can attach
    #[arg(short, long)]
    debug: bool,

    /// Worker config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
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
    let config: WorkerConfig =
        config::load(cli.config.as_deref()).context("cannot load worker config")?;
    let toolchain = worker::toolchain(&config)?;

    if cli.debug {
        eprintln!("pid {}: attach a debugger, then press enter", std::process::id());
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
    }

    worker::run(cli.port, &config, toolchain)
        .with_context(|| format!("cannot serve host on port {}", cli.port))?;
    Ok(())
}
