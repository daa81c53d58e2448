// src/main.rs - Plotter host entry point
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use plotspool::config::{self, Config};
use plotspool::device::sim::SimDriver;
use plotspool::device::PlotterDriver;
use plotspool::persist::SpoolDir;
use plotspool::prompt::StdinPrompt;
use plotspool::spooler::{Spooler, SpoolerPolicy};

#[derive(Debug, Parser)]
#[command(name = "plotter-host", about = "Job spooler for a single pen plotter")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "spooler.toml")]
    config: PathBuf,

    /// Override the spool directory from the config
    #[arg(long)]
    spool_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let config = if args.config.exists() {
        config::load_config(&args.config).map_err(|e| {
            tracing::error!(path = %args.config.display(), error = %e, "failed to load config");
            Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
        })?
    } else {
        tracing::info!(path = %args.config.display(), "no config file, using defaults");
        Config::default()
    };

    let spool_root = args.spool_dir.unwrap_or_else(|| config.spool.dir.clone());
    tracing::info!(spool = %spool_root.display(), backend = %config.device.backend, "starting plotter host");

    let driver: Arc<dyn PlotterDriver> = match config.device.backend.as_str() {
        "sim" => Arc::new(SimDriver::new(&config.device)),
        other => {
            tracing::warn!(backend = other, "unknown device backend, falling back to sim");
            Arc::new(SimDriver::new(&config.device))
        }
    };

    let policy = SpoolerPolicy {
        repeat_jobs: config.policy.repeat_jobs,
        resume_on_start: config.policy.resume_on_start,
        pen_up_percent: config.device.pen_up_percent,
        pen_down_percent: config.device.pen_down_percent,
    };
    let spooler = Spooler::new(policy, driver, SpoolDir::new(spool_root));

    // Log queue size changes for the operator's benefit.
    let mut sizes = spooler.subscribe_queue_size();
    tokio::spawn(async move {
        while let Ok(size) = sizes.recv().await {
            tracing::info!(jobs = size, "queue size changed");
        }
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
            let _ = shutdown_tx.send(());
        }
    });

    let prompt: Arc<dyn plotspool::Prompt> = Arc::new(StdinPrompt::new());
    spooler.run(prompt, shutdown_rx).await?;
    Ok(())
}
