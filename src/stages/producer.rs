use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::DynamicImage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProducerConfig;
use crate::error::{AppError, FrameError, ImagingError};
use crate::frame::FrameRecord;
use crate::imaging::{list_images, ImageCodec, PayloadEncoding, StandardCodec};
use crate::stages::{emit_frame, Stage};
use crate::telemetry::StageStats;
use crate::transport::PushSocket;

const NAME: &str = "producer";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Streams every image of a folder downstream, one frame per image.
pub struct ProducerStage {
    config: ProducerConfig,
    output: PushSocket,
    codec: Arc<dyn ImageCodec>,
    images: Vec<PathBuf>,
}

impl ProducerStage {
    /// Lists the source folder and opens the output channel. An empty folder is fatal.
    pub async fn open(config: ProducerConfig) -> Result<Self, AppError> {
        let images = list_images(&config.image_dir)?;
        if images.is_empty() {
            return Err(ImagingError::Folder(
                config.image_dir.display().to_string(),
                "contains no png, jpg, jpeg or bmp images".to_string(),
            )
            .into());
        }
        info!("Found {} images in {}", images.len(), config.image_dir.display());

        let output = PushSocket::open(&config.output).await?;
        Ok(Self {
            config,
            output,
            codec: Arc::new(StandardCodec),
            images,
        })
    }

    // Sets the image codec, this will override the default codec.
    pub fn codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.output.local_addr()
    }

    pub async fn close(self) {
        self.output.close().await;
    }
}

#[async_trait]
impl Stage for ProducerStage {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<StageStats, AppError> {
        let mut stats = StageStats::default();
        let peer_wait = Duration::from_millis(self.config.peer_wait_ms);
        let interval = Duration::from_millis(self.config.frame_interval_ms);

        let connected = tokio::select! {
            _ = cancel.cancelled() => return Ok(stats),
            connected = self.output.wait_for_peer(peer_wait) => connected,
        };
        if !connected {
            warn!(
                endpoint = self.output.endpoint(),
                "No downstream peer after {:?}, frames are dropped until one connects", peer_wait
            );
        }

        let mut next_seq: i64 = 0;
        'cycles: loop {
            for path in &self.images {
                if cancel.is_cancelled() {
                    break 'cycles;
                }
                let seq = next_seq;
                next_seq += 1;
                stats.record_received(NAME);

                let sent = match load_frame(&self.codec, path, seq, self.config.encoding).await {
                    Ok((record, payload)) => emit_frame(&mut self.output, &record, payload)
                        .await
                        .map(|()| record),
                    Err(e) => Err(e),
                };
                match sent {
                    Ok(record) => {
                        stats.record_completed();
                        debug!(seq, image = %record.image_name, bytes = record.data_bytes, "Sent frame");
                    }
                    Err(e) => stats.record_drop(NAME, seq, &e),
                }

                tokio::select! {
                    _ = cancel.cancelled() => break 'cycles,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            if !self.config.repeat {
                break;
            }
        }

        if !self.output.drain(DRAIN_TIMEOUT).await {
            warn!("Downstream did not take every queued frame before shutdown");
        }
        Ok(stats)
    }
}

/// Reads one source image and re-encodes it as the payload of frame `seq`.
async fn load_frame(
    codec: &Arc<dyn ImageCodec>,
    path: &Path,
    seq: i64,
    encoding: PayloadEncoding,
) -> Result<(FrameRecord, Bytes), FrameError> {
    let source = tokio::fs::read(path)
        .await
        .map_err(|e| ImagingError::Read(path.display().to_string(), e))?;
    let image_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let codec = Arc::clone(codec);
    let (rows, cols, payload) = tokio::task::spawn_blocking(move || {
        let image = DynamicImage::ImageRgb8(codec.decode(&source)?.to_rgb8());
        let payload = codec.encode(&image, encoding)?;
        Ok::<_, ImagingError>((image.height(), image.width(), payload))
    })
    .await
    .map_err(|e| ImagingError::Encode(encoding.tag().to_string(), e.to_string()))??;

    let record = FrameRecord::new(seq, image_name, rows, cols, encoding.tag(), payload.len() as u64);
    Ok((record, Bytes::from(payload)))
}
