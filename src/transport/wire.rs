//! Byte layout of messages on a channel connection.
//!
//! A connection starts with a greeting from each side:
//! `[magic: "FPIP"][version: u8][role: u8]`.
//!
//! After that it carries multi-part messages. Every part is
//! `[length: u32 LE][flags: u8][body: length bytes]`, and bit 0 of `flags`
//! says another part of the same message follows.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

pub const MAGIC: [u8; 4] = *b"FPIP";
pub const PROTOCOL_VERSION: u8 = 1;
pub const MAX_PARTS: usize = 16;

const GREETING_LENGTH: usize = 6;
const PART_HEADER_LENGTH: usize = 5;
const FLAG_MORE: u8 = 0x01;
/// Bodies grow as bytes arrive; a header alone never reserves more than this.
const INITIAL_BODY_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketRole {
    Push = 1,
    Pull = 2,
}

impl SocketRole {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(SocketRole::Push),
            2 => Some(SocketRole::Pull),
            _ => None,
        }
    }

    /// The only role this one may talk to.
    pub fn peer(self) -> Self {
        match self {
            SocketRole::Push => SocketRole::Pull,
            SocketRole::Pull => SocketRole::Push,
        }
    }
}

fn greeting(role: SocketRole) -> [u8; GREETING_LENGTH] {
    [MAGIC[0], MAGIC[1], MAGIC[2], MAGIC[3], PROTOCOL_VERSION, role as u8]
}

/// Sends our greeting and validates the peer's.
pub async fn handshake<S>(stream: &mut S, role: SocketRole) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&greeting(role)).await?;
    stream.flush().await?;

    let mut buffer = [0u8; GREETING_LENGTH];
    stream.read_exact(&mut buffer).await?;

    if buffer[..4] != MAGIC {
        return Err(TransportError::Handshake("peer is not a frame channel".to_string()));
    }
    if buffer[4] != PROTOCOL_VERSION {
        return Err(TransportError::Handshake(format!(
            "unsupported protocol version {} (expected {})",
            buffer[4], PROTOCOL_VERSION
        )));
    }
    match SocketRole::from_byte(buffer[5]) {
        Some(peer) if peer == role.peer() => Ok(()),
        Some(peer) => Err(TransportError::Handshake(format!(
            "{peer:?} socket cannot talk to a {role:?} socket"
        ))),
        None => Err(TransportError::Handshake(format!("unknown socket role {}", buffer[5]))),
    }
}

/// Writes every part of one message and flushes.
pub async fn write_message<W>(writer: &mut W, parts: &[Bytes]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if parts.is_empty() {
        return Err(TransportError::Protocol("cannot send an empty message".to_string()));
    }
    if parts.len() > MAX_PARTS {
        return Err(TransportError::TooManyParts(MAX_PARTS));
    }
    let last = parts.len() - 1;
    for (index, part) in parts.iter().enumerate() {
        let length = u32::try_from(part.len())
            .map_err(|_| TransportError::PartTooLarge(part.len(), u32::MAX as usize))?;
        let flags = if index < last { FLAG_MORE } else { 0 };
        let mut header = [0u8; PART_HEADER_LENGTH];
        header[..4].copy_from_slice(&length.to_le_bytes());
        header[4] = flags;
        writer.write_all(&header).await?;
        writer.write_all(part).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Reads one complete message. `Ok(None)` means the peer closed the
/// connection cleanly between messages; a message cut short is an error and
/// none of its parts are returned.
pub async fn read_message<R>(
    reader: &mut R,
    max_part_bytes: usize,
) -> Result<Option<Vec<Bytes>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut parts = Vec::with_capacity(2);
    loop {
        let mut header = [0u8; PART_HEADER_LENGTH];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && parts.is_empty() => {
                return Ok(None);
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(TransportError::Protocol(format!(
                    "connection closed after {} part(s) of a message",
                    parts.len()
                )));
            }
            Err(e) => return Err(TransportError::Io(e)),
        }

        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if length > max_part_bytes {
            return Err(TransportError::PartTooLarge(length, max_part_bytes));
        }
        let flags = header[4];

        let mut body = Vec::with_capacity(length.min(INITIAL_BODY_CAPACITY));
        (&mut *reader).take(length as u64).read_to_end(&mut body).await?;
        if body.len() < length {
            return Err(TransportError::Protocol("connection closed inside a part".to_string()));
        }
        parts.push(Bytes::from(body));

        if flags & FLAG_MORE == 0 {
            return Ok(Some(parts));
        }
        if parts.len() >= MAX_PARTS {
            return Err(TransportError::TooManyParts(MAX_PARTS));
        }
    }
}
