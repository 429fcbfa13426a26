use bytes::Bytes;

use crate::error::FrameError;
use crate::frame::{FrameRecord, RawFrame};
use crate::transport::{PushSocket, SendMode, SendStatus};

/// Sends one frame without waiting: it goes out whole or is dropped.
pub async fn emit_frame(
    socket: &mut PushSocket,
    record: &FrameRecord,
    payload: Bytes,
) -> Result<(), FrameError> {
    emit_raw_frame(socket, RawFrame::encode(record, payload)?).await
}

/// [`emit_frame`] for metadata that is already serialized.
///
/// The metadata part is only staged once the socket can take a message, and
/// the payload part commits both together, so a refusal at either step
/// leaves nothing on the wire. No retry happens here.
pub async fn emit_raw_frame(socket: &mut PushSocket, frame: RawFrame) -> Result<(), FrameError> {
    let metadata = socket
        .send_part(frame.metadata, true, SendMode::NonBlocking)
        .await
        .map_err(FrameError::SendFailed)?;
    if metadata == SendStatus::WouldBlock {
        return Err(FrameError::Backpressure);
    }

    match socket
        .send_part(frame.payload, false, SendMode::NonBlocking)
        .await
        .map_err(FrameError::SendFailed)?
    {
        SendStatus::Sent => Ok(()),
        SendStatus::WouldBlock => Err(FrameError::Backpressure),
    }
}
