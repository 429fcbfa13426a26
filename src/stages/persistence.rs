use std::net::SocketAddr;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{PersistenceConfig, StorageConfig};
use crate::error::{AppError, FrameError, TransportError};
use crate::frame::{RawFrame, UNKNOWN_SEQUENCE};
use crate::stages::{open_frame, Stage};
use crate::storage::FrameStore;
use crate::telemetry::StageStats;
use crate::transport::PullSocket;

const NAME: &str = "persistence";

/// Appends every valid arriving frame to the frame store.
pub struct PersistenceStage {
    input: PullSocket,
    store: FrameStore,
}

impl PersistenceStage {
    pub async fn open(persistence: &PersistenceConfig, storage: &StorageConfig) -> Result<Self, AppError> {
        let store = FrameStore::open(&storage.database_path).await?;
        let input = PullSocket::open(&persistence.input).await?;
        Ok(Self::new(input, store))
    }

    pub fn new(input: PullSocket, store: FrameStore) -> Self {
        Self { input, store }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.input.local_addr()
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    pub async fn close(self) {
        self.input.close().await;
        self.store.close().await;
    }

    /// Stores one frame, returning its sequence number and row id.
    async fn persist(&self, frame: &RawFrame) -> Result<(i64, i64), (i64, FrameError)> {
        let record = open_frame(frame)?;
        let seq = record.seq_number;
        let meta_json = frame.metadata_text().map_err(|e| (seq, e))?;
        let id = self
            .store
            .append(&record, meta_json, &frame.payload)
            .await
            .map_err(|e| (seq, FrameError::StorageWrite(e)))?;
        Ok((seq, id))
    }
}

#[async_trait]
impl Stage for PersistenceStage {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<StageStats, AppError> {
        let mut stats = StageStats::default();

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.input.receive_frame() => received,
            };
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

            match self.persist(&frame).await {
                Ok((seq, id)) => {
                    stats.record_completed();
                    debug!(seq, row = id, "Stored frame");
                }
                Err((seq, e)) => stats.record_drop(NAME, seq, &e),
            }
        }

        Ok(stats)
    }
}
