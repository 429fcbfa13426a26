use thiserror::Error;

// Main Application Error Type, anything surfacing here ends the process.

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Transport unavailable: {0}")]
    Transport(#[from] TransportError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Imaging error: {0}")]
    Imaging(#[from] ImagingError),
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

// Frame-scoped failures. A frame hitting any of these is dropped, the stage keeps going.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("downstream not draining (would block)")]
    Backpressure,
    #[error("send failed: {0}")]
    SendFailed(TransportError),
    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),
    #[error("payload size mismatch: declared {declared} bytes, got {actual}")]
    PayloadSizeMismatch { declared: u64, actual: usize },
    #[error("image codec failure: {0}")]
    Codec(#[from] ImagingError),
    #[error("storage write failed: {0}")]
    StorageWrite(#[from] StorageError),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl FrameError {
    /// Short stable label used for counters.
    pub fn kind(&self) -> &'static str {
        match self {
            FrameError::Backpressure => "backpressure",
            FrameError::SendFailed(_) => "send_failed",
            FrameError::MalformedMetadata(_) => "malformed_metadata",
            FrameError::PayloadSizeMismatch { .. } => "payload_size_mismatch",
            FrameError::Codec(_) => "codec",
            FrameError::StorageWrite(_) => "storage_write",
            FrameError::Protocol(_) => "protocol",
        }
    }
}

impl From<CodecError> for FrameError {
    fn from(err: CodecError) -> Self {
        FrameError::MalformedMetadata(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid endpoint '{0}': {1}")]
    InvalidEndpoint(String, String),
    #[error("Failed to bind to {1}: {0}")]
    Bind(std::io::Error, String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Part of {0} bytes exceeds the limit of {1} bytes")]
    PartTooLarge(usize, usize),
    #[error("Message exceeds {0} parts")]
    TooManyParts(usize),
    #[error("Protocol violation: {0}")]
    Protocol(String),
    #[error("Socket is closed")]
    Closed,
}

impl TransportError {
    /// Errors that only spoil the current message, the socket stays usable.
    pub fn is_frame_scoped(&self) -> bool {
        matches!(self, TransportError::Protocol(_))
    }
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("metadata is not well-formed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("metadata could not be encoded: {0}")]
    Unencodable(serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Failed to encode image as {0}: {1}")]
    Encode(String, String),
    #[error("Failed to read {0}: {1}")]
    Read(String, std::io::Error),
    #[error("Image folder '{0}' is not usable: {1}")]
    Folder(String, String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),
}
