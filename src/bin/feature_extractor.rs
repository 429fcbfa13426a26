use std::path::PathBuf;

use clap::Parser;
use frame_pipeline::stages::{run_stage, shutdown_signal, ProcessingStage};
use frame_pipeline::telemetry::init_logging;
use frame_pipeline::{AppError, Configuration};
use tokio_util::sync::CancellationToken;

/// Detects keypoints in every frame and passes the frames on.
#[derive(Parser, Debug)]
#[command(name = "feature-extractor", version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "FRAME_PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Number of extraction workers, overrides `processing.workers`
    #[arg(short, long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();
    let mut configuration = Configuration::load(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        configuration.processing.workers = workers;
    }
    init_logging(&configuration.log_level)?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let mut processing = ProcessingStage::open(&configuration.processing).await?;
    let result = run_stage(&mut processing, cancel).await;
    processing.close().await;
    result.map(|_| ())
}
