//! # Tracebench - Main Entry Point
//!
//! Two drivers share this binary:
//!
//! - **`run`**: starts one experiment's servers, tracing backend, agents and
//!   client, runs them for a fixed duration and tears everything down
//! - **`sweep`**: enumerates an experiment matrix, runs every missing
//!   experiment by re-invoking this binary with `run`, and writes the CSV summary
//!
//! ## Interrupts
//!
//! Prompts happen before the CTRL-C handler is installed, so CTRL-C at a prompt
//! aborts immediately. Once experiments are running, CTRL-C cancels the shared
//! token instead: a `run` stops its window early and still tears down, and a
//! `sweep` starts no further experiments.

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracebench::{
    cli::{Cli, Commands},
    logging,
    orchestrator::{self, ExperimentConfig},
    results::{self, SweepConfig},
};
use tracing::{error, info, warn};

/// Cancel `token` on the first CTRL-C
fn install_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted; stopping");
                token.cancel();
            }
            Err(e) => error!("Failed to listen for CTRL-C: {}", e),
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let _guard = logging::init(args.verbose, None)?;
            let config = ExperimentConfig::from_args(&args)?;
            let mut orchestrator = orchestrator::prepare(config)?;

            let cancel = CancellationToken::new();
            install_interrupt_handler(cancel.clone());
            let reason = orchestrator.run(&cancel).await?;
            info!("Experiment finished ({:?})", reason);
        }
        Commands::Sweep(args) => {
            let config = SweepConfig::from_args(&args)?;
            std::fs::create_dir_all(&config.out)?;
            let _guard = logging::init(
                config.verbose,
                Some(&config.out.join(tracebench::defaults::SWEEP_LOG_FILE)),
            )?;
            info!("Starting tracebench {} sweep", tracebench::VERSION);
            let sweep = results::prepare_sweep(config)?;

            let cancel = CancellationToken::new();
            install_interrupt_handler(cancel.clone());
            sweep.execute(&cancel).await?;
        }
    }

    Ok(())
}
