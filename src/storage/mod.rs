//! Durable frame storage.

mod frame_store;

pub use frame_store::{FrameStore, StoredFrame};
