use std::path::PathBuf;

use clap::Parser;
use frame_pipeline::stages::{run_stage, shutdown_signal, ProducerStage};
use frame_pipeline::telemetry::init_logging;
use frame_pipeline::{AppError, Configuration};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Streams the images of a folder to the feature extractor.
#[derive(Parser, Debug)]
#[command(name = "image-generator", version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "FRAME_PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Folder of source images, overrides `producer.image_dir`
    image_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();
    let mut configuration = Configuration::load(args.config.as_deref())?;
    if let Some(image_dir) = args.image_dir {
        configuration.producer.image_dir = image_dir;
    }
    init_logging(&configuration.log_level)?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let mut producer = ProducerStage::open(configuration.producer).await?;
    let result = run_stage(&mut producer, cancel).await;
    producer.close().await;
    result?;

    info!("Image generator finished");
    Ok(())
}
