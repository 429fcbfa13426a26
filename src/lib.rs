pub mod config;
pub mod error;
pub mod frame;
pub mod imaging;
pub mod stages;
pub mod storage;
pub mod telemetry;
pub mod transport;

pub use config::Configuration;
pub use error::{AppError, FrameError};
pub use frame::{FrameRecord, Keypoint, RawFrame};
pub use stages::{run_stage, PersistenceStage, ProcessingStage, ProducerStage, Stage};
