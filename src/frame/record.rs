use serde::{Deserialize, Serialize};

/// Sequence number carried by metadata that never declared one.
pub const UNKNOWN_SEQUENCE: i64 = -1;

/// Metadata for one frame flowing through the pipeline.
///
/// Missing keys decode to their defaults: `seq_number` becomes
/// [`UNKNOWN_SEQUENCE`], numbers become zero, strings become empty. Treat those
/// as "unknown", not as values the sender actually produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameRecord {
    pub seq_number: i64,
    pub image_name: String,
    pub rows: u32,
    pub cols: u32,
    pub encoding: String,
    pub data_bytes: u64,
    pub keypoint_count: u32,
    /// Set only by the processing stage; travels on the wire, never as a column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keypoints: Option<Vec<Keypoint>>,
}

impl Default for FrameRecord {
    fn default() -> Self {
        Self {
            seq_number: UNKNOWN_SEQUENCE,
            image_name: String::new(),
            rows: 0,
            cols: 0,
            encoding: String::new(),
            data_bytes: 0,
            keypoint_count: 0,
            keypoints: None,
        }
    }
}

impl FrameRecord {
    pub fn new(
        seq_number: i64,
        image_name: impl Into<String>,
        rows: u32,
        cols: u32,
        encoding: impl Into<String>,
        data_bytes: u64,
    ) -> Self {
        Self {
            seq_number,
            image_name: image_name.into(),
            rows,
            cols,
            encoding: encoding.into(),
            data_bytes,
            ..Self::default()
        }
    }

    /// Replaces the keypoint list, keeping `keypoint_count` in step with it.
    pub fn set_keypoints(&mut self, keypoints: Vec<Keypoint>) {
        self.keypoint_count = keypoints.len() as u32;
        self.keypoints = Some(keypoints);
    }

    pub fn has_known_sequence(&self) -> bool {
        self.seq_number != UNKNOWN_SEQUENCE
    }
}

/// A detected visual feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub angle: f32,
    pub response: f32,
    pub octave: i32,
}
