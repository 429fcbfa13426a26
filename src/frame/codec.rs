//! Textual metadata serialization.
//!
//! Encoding is strict: every field of [`FrameRecord`] is written by name.
//! Decoding is lenient about absent keys and ignores unknown ones, and only
//! fails when the text is not a well-formed JSON object of the right shape.
//! A stage that relays metadata uses [`merge`] so the keys it does not know
//! still reach the next stage.

use serde_json::{Map, Value};

use crate::error::CodecError;
use crate::frame::FrameRecord;

pub fn encode(record: &FrameRecord) -> Result<String, CodecError> {
    serde_json::to_string(record).map_err(CodecError::Unencodable)
}

pub fn decode(text: &str) -> Result<FrameRecord, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Writes `record` over the metadata it was decoded from. Known keys take the
/// record's values, every other key is kept as received.
pub fn merge(original: &str, record: &FrameRecord) -> Result<String, CodecError> {
    let mut fields: Map<String, Value> = serde_json::from_str(original)?;
    if let Value::Object(known) = serde_json::to_value(record).map_err(CodecError::Unencodable)? {
        fields.extend(known);
    }
    serde_json::to_string(&fields).map_err(CodecError::Unencodable)
}
