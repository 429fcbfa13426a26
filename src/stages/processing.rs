use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ProcessingConfig;
use crate::error::{AppError, FrameError, ImagingError, TransportError};
use crate::frame::{codec, FrameRecord, RawFrame, UNKNOWN_SEQUENCE};
use crate::imaging::{FastDetector, FeatureDetector, ImageCodec, StandardCodec};
use crate::stages::{emit_raw_frame, open_frame, Stage};
use crate::telemetry::StageStats;
use crate::transport::{PullSocket, PushSocket};

const NAME: &str = "processing";

/// Sequence number, then the frame to forward with its keypoint count.
type WorkResult = (i64, Result<(RawFrame, u32), FrameError>);

/// Decodes a payload and attaches the keypoints found in it.
#[derive(Clone)]
pub struct FeatureExtractor {
    codec: Arc<dyn ImageCodec>,
    detector: Arc<dyn FeatureDetector>,
}

impl FeatureExtractor {
    pub fn new(codec: Arc<dyn ImageCodec>, detector: Arc<dyn FeatureDetector>) -> Self {
        Self { codec, detector }
    }

    pub fn extract(&self, record: &mut FrameRecord, payload: &[u8]) -> Result<(), FrameError> {
        let image = self.codec.decode(payload)?;
        if image.width() == 0 || image.height() == 0 {
            return Err(ImagingError::Decode("decoded image is empty".to_string()).into());
        }
        record.set_keypoints(self.detector.detect(&image));
        Ok(())
    }

    /// Extracts keypoints from a received frame and writes them over the
    /// metadata text that arrived, so keys unknown here travel on unchanged.
    pub fn augment(&self, mut record: FrameRecord, frame: RawFrame) -> Result<(RawFrame, u32), FrameError> {
        self.extract(&mut record, &frame.payload)?;
        let metadata = codec::merge(frame.metadata_text()?, &record)?;
        let augmented = RawFrame {
            metadata: Bytes::from(metadata),
            payload: frame.payload,
        };
        augmented.validate(&record)?;
        Ok((augmented, record.keypoint_count))
    }
}

/// Receives frames, runs feature extraction on a bounded pool of blocking
/// workers and forwards the augmented metadata with the untouched payload.
pub struct ProcessingStage {
    input: PullSocket,
    output: PushSocket,
    extractor: FeatureExtractor,
    workers: usize,
}

impl ProcessingStage {
    pub async fn open(config: &ProcessingConfig) -> Result<Self, AppError> {
        let output = PushSocket::open(&config.output).await?;
        let input = PullSocket::open(&config.input).await?;
        let detector = FastDetector::new(config.fast_threshold, config.octaves);
        Ok(Self {
            input,
            output,
            extractor: FeatureExtractor::new(Arc::new(StandardCodec), Arc::new(detector)),
            workers: config.workers.max(1),
        })
    }

    // Sets the feature extractor, this will override the default codec and detector.
    pub fn extractor(mut self, extractor: FeatureExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn input_addr(&self) -> Option<SocketAddr> {
        self.input.local_addr()
    }

    pub fn output_addr(&self) -> Option<SocketAddr> {
        self.output.local_addr()
    }

    /// Returns `true` once the downstream stage is connected.
    pub async fn wait_for_downstream(&mut self, timeout: Duration) -> bool {
        self.output.wait_for_peer(timeout).await
    }

    pub async fn close(self) {
        self.input.close().await;
        self.output.close().await;
    }

    async fn forward(&mut self, joined: Result<WorkResult, JoinError>, stats: &mut StageStats) {
        let (seq, result) = match joined {
            Ok(work) => work,
            Err(e) => {
                error!("Feature worker failed: {}", e);
                let failure = FrameError::Codec(ImagingError::Decode(format!("worker failed: {e}")));
                stats.record_drop(NAME, UNKNOWN_SEQUENCE, &failure);
                return;
            }
        };

        let sent = match result {
            Ok((frame, keypoints)) => emit_raw_frame(&mut self.output, frame)
                .await
                .map(|()| keypoints),
            Err(e) => Err(e),
        };
        match sent {
            Ok(keypoints) => {
                stats.record_completed();
                debug!(seq, keypoints, "Forwarded frame");
            }
            Err(e) => stats.record_drop(NAME, seq, &e),
        }
    }
}

#[async_trait]
impl Stage for ProcessingStage {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<StageStats, AppError> {
        let mut stats = StageStats::default();
        let mut in_flight: JoinSet<WorkResult> = JoinSet::new();
        let workers = self.workers;
        info!("Extracting features with {} worker(s)", workers);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.forward(joined, &mut stats).await;
                }
                received = self.input.receive_frame(), if in_flight.len() < workers => {
                    let frame = match received {
                        Ok(frame) => frame,
                        Err(TransportError::Closed) => break,
                        Err(e) if e.is_frame_scoped() => {
                            stats.record_received(NAME);
                            stats.record_drop(NAME, UNKNOWN_SEQUENCE, &FrameError::Protocol(e.to_string()));
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    };
                    stats.record_received(NAME);

                    let record = match open_frame(&frame) {
                        Ok(record) => record,
                        Err((seq, e)) => {
                            stats.record_drop(NAME, seq, &e);
                            continue;
                        }
                    };
                    let extractor = self.extractor.clone();
                    in_flight.spawn_blocking(move || {
                        let seq = record.seq_number;
                        (seq, extractor.augment(record, frame))
                    });
                }
            }
        }

        if !in_flight.is_empty() {
            info!("Abandoning {} frame(s) still being processed", in_flight.len());
        }
        Ok(stats)
    }
}
