//! UAP Ingest - activity pipeline runner

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use uap_common::logging::{init_logging, LogConfig, LogLevel};
use uap_ingest::checkpoint::{all_watermarks, FileCheckpointStore};
use uap_ingest::{IngestConfig, PipelineOrchestrator};

#[derive(Parser, Debug)]
#[command(name = "uap-ingest")]
#[command(author, version, about = "Checkpointed activity ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run one full ingestion cycle (all four entities + summary)
    Run,

    /// Print the current per-entity watermarks
    Checkpoints,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env()?;
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    log_config.log_file_prefix = "uap-ingest".to_string();
    init_logging(&log_config)?;

    match cli.command {
        Command::Run => {
            let config = IngestConfig::from_env()?;
            info!(
                api = %config.api_base_url,
                dataset = %config.dataset,
                output = %config.output_dir.display(),
                "starting ingestion cycle"
            );

            let orchestrator = PipelineOrchestrator::from_config(&config).await?;
            let report = orchestrator.run().await?;

            for entity in &report.entities {
                match &entity.outcome {
                    Ok(outcome) => info!(entity = %entity.entity, outcome = ?outcome, "ok"),
                    Err(e) => error!(entity = %entity.entity, error = %e, "failed"),
                }
            }

            if !report.is_success() {
                error!(run_id = %report.run_id, summary = ?report.summary, "cycle failed");
                std::process::exit(1);
            }

            info!(run_id = %report.run_id, "cycle complete");
        },
        Command::Checkpoints => {
            // Inspecting watermarks needs only the checkpoint document,
            // not the full (warehouse-validated) configuration.
            let store = FileCheckpointStore::open(IngestConfig::checkpoint_path_from_env())?;
            for (entity, watermark) in all_watermarks(&store)? {
                println!("{:<8} {}", entity, watermark);
            }
        },
    }

    Ok(())
}
