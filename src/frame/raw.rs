use bytes::Bytes;

use crate::error::FrameError;
use crate::frame::{codec, FrameRecord};

/// One frame as it travels: metadata text first, payload bytes second.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub metadata: Bytes,
    pub payload: Bytes,
}

impl RawFrame {
    /// Serializes `record` for sending. The declared payload length must match.
    pub fn encode(record: &FrameRecord, payload: Bytes) -> Result<Self, FrameError> {
        let frame = Self {
            metadata: Bytes::from(codec::encode(record)?),
            payload,
        };
        frame.validate(record)?;
        Ok(frame)
    }

    /// Decodes the metadata and checks it against the payload actually received.
    pub fn decode(&self) -> Result<FrameRecord, FrameError> {
        let record = codec::decode(self.metadata_text()?)?;
        self.validate(&record)?;
        Ok(record)
    }

    /// The declared `data_bytes` must match the payload that actually travels.
    pub fn validate(&self, record: &FrameRecord) -> Result<(), FrameError> {
        if record.data_bytes != self.payload.len() as u64 {
            return Err(FrameError::PayloadSizeMismatch {
                declared: record.data_bytes,
                actual: self.payload.len(),
            });
        }
        Ok(())
    }

    pub fn metadata_text(&self) -> Result<&str, FrameError> {
        std::str::from_utf8(&self.metadata)
            .map_err(|e| FrameError::MalformedMetadata(format!("metadata is not UTF-8: {e}")))
    }

    pub fn into_parts(self) -> Vec<Bytes> {
        vec![self.metadata, self.payload]
    }
}
