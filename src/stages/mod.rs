//! The three pipeline stages and what they share.

mod persistence;
mod policy;
mod processing;
mod producer;
mod shutdown;

use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::error::{AppError, FrameError};
use crate::frame::{codec, FrameRecord, RawFrame, UNKNOWN_SEQUENCE};
use crate::telemetry::StageStats;

pub use persistence::PersistenceStage;
pub use policy::{emit_frame, emit_raw_frame};
pub use processing::{FeatureExtractor, ProcessingStage};
pub use producer::ProducerStage;
pub use shutdown::shutdown_signal;

/// A long-running loop that moves frames until cancelled or its input closes.
#[async_trait]
pub trait Stage: Send {
    fn name(&self) -> &'static str;
    async fn run(&mut self, cancel: CancellationToken) -> Result<StageStats, AppError>;
}

/// Runs a stage to completion, logging its lifetime and final counters.
#[instrument(skip_all, fields(stage = stage.name()))]
pub async fn run_stage<S>(stage: &mut S, cancel: CancellationToken) -> Result<StageStats, AppError>
where
    S: Stage + ?Sized,
{
    let name = stage.name();
    let start = Instant::now();
    info!("Starting {} stage", name);

    let result = stage.run(cancel).await;

    let elapsed = start.elapsed();
    match &result {
        Ok(stats) => {
            stats.log_summary(name);
            info!("{} stage stopped after {:.1?}", name, elapsed);
        }
        Err(e) => error!("{} stage failed after {:.1?}: {}", name, elapsed, e),
    }
    result
}

/// Decodes and validates an arriving frame. The error carries the sequence
/// number whenever the metadata itself was readable.
pub(crate) fn open_frame(frame: &RawFrame) -> Result<FrameRecord, (i64, FrameError)> {
    let record = frame
        .metadata_text()
        .and_then(|text| codec::decode(text).map_err(FrameError::from))
        .map_err(|e| (UNKNOWN_SEQUENCE, e))?;
    frame.validate(&record).map_err(|e| (record.seq_number, e))?;
    Ok(record)
}
