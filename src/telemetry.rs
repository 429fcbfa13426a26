use std::collections::BTreeMap;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::{AppError, FrameError};

const REPORT_EVERY: u64 = 100;

/// Installs the global `fmt` subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) -> Result<(), AppError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| AppError::Logging(e.to_string()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}

/// Frame counters of one stage run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageStats {
    pub received: u64,
    /// Forwarded downstream, or persisted for the last stage.
    pub completed: u64,
    pub dropped: BTreeMap<&'static str, u64>,
}

impl StageStats {
    pub fn record_received(&mut self, stage: &str) {
        self.received += 1;
        if self.received % REPORT_EVERY == 0 {
            debug!(
                stage,
                received = self.received,
                completed = self.completed,
                dropped = self.dropped_total(),
                "Progress"
            );
        }
    }

    pub fn record_completed(&mut self) {
        self.completed += 1;
    }

    /// Counts and reports a dropped frame.
    pub fn record_drop(&mut self, stage: &str, seq: i64, error: &FrameError) {
        *self.dropped.entry(error.kind()).or_default() += 1;
        warn!(stage, seq, reason = %error, "Dropping frame");
    }

    pub fn dropped(&self, kind: &str) -> u64 {
        self.dropped.get(kind).copied().unwrap_or(0)
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.values().sum()
    }

    pub fn log_summary(&self, stage: &str) {
        info!(
            stage,
            received = self.received,
            completed = self.completed,
            dropped = self.dropped_total(),
            "Frame totals"
        );
        for (kind, count) in &self.dropped {
            info!(stage, reason = kind, count, "Dropped frames");
        }
    }
}
