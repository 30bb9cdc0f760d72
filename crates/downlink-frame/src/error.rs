use downlink_transport::TransportError;

/// Errors that escape the frame layer.
///
/// Protocol-level conditions (sync loss, CRC mismatch, short reads) are not
/// errors; they surface as [`crate::FramePoll`] outcomes instead.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds what the 2-byte length field or config allows.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The byte source failed or was closed.
    #[error("byte source failure: {0}")]
    Source(#[from] TransportError),

    /// An I/O error occurred while writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sink accepted zero bytes while a frame was being written.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
