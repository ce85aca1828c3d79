//! Sluice - extraction pipeline runner

use anyhow::Result;
use clap::Parser;
use sluice_common::logging::{init_logging, LogConfig, LogLevel};
use sluice_extractor::config::ExtractorConfig;
use sluice_extractor::orchestrator;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(author, version, about = "Configurable extraction pipeline runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run all configured jobs
    Run {
        /// Pipeline configuration file
        #[arg(short, long, default_value = "./sluice.yaml")]
        config: String,
    },

    /// Validate a configuration file without running anything
    Validate {
        /// Pipeline configuration file
        #[arg(short, long, default_value = "./sluice.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Environment variables take precedence over the verbose flag
    let log_config = LogConfig::from_env().unwrap_or_default();
    let log_config = if cli.verbose {
        log_config.with_level(LogLevel::Debug)
    } else {
        log_config
    };
    init_logging(&log_config)?;

    match cli.command {
        Command::Run { config } => {
            let config = ExtractorConfig::load(&config)?;

            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, shutting down");
                    signal_cancel.cancel();
                }
            });

            let outcome = orchestrator::run_pipeline(config, cancel).await?;
            if let Some(message) = outcome.failure_message() {
                anyhow::bail!(message);
            }
            info!("All jobs succeeded");
        },
        Command::Validate { config } => {
            let config = ExtractorConfig::load(&config)?;
            info!(
                pipeline = %config.pipeline.id,
                jobs = config.jobs.len(),
                "Configuration is valid"
            );
        },
    }

    Ok(())
}
