pub mod codec;
mod raw;
mod record;

pub use raw::RawFrame;
pub use record::{FrameRecord, Keypoint, UNKNOWN_SEQUENCE};
