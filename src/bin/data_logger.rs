use std::path::PathBuf;

use clap::Parser;
use frame_pipeline::stages::{run_stage, shutdown_signal, PersistenceStage};
use frame_pipeline::telemetry::init_logging;
use frame_pipeline::{AppError, Configuration};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Stores every arriving frame in a SQLite database.
#[derive(Parser, Debug)]
#[command(name = "data-logger", version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "FRAME_PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overrides `storage.database_path`
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();
    let mut configuration = Configuration::load(args.config.as_deref())?;
    if let Some(database) = args.database {
        configuration.storage.database_path = database;
    }
    init_logging(&configuration.log_level)?;
    info!("Writing frames to {}", configuration.storage.database_path.display());

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let mut persistence = PersistenceStage::open(&configuration.persistence, &configuration.storage).await?;
    let result = run_stage(&mut persistence, cancel).await;
    persistence.close().await;
    result.map(|_| ())
}
