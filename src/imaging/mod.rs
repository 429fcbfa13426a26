//! Image capabilities the stages call into: payload codec, keypoint
//! detection and source folder enumeration.

mod codec;
mod detector;
mod scanner;

pub use codec::{ImageCodec, PayloadEncoding, StandardCodec};
pub use detector::{FastDetector, FeatureDetector};
pub use scanner::{list_images, IMAGE_EXTENSIONS};
