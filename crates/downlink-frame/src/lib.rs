//! Frame synchronisation and integrity checking for the telemetry downlink.
//!
//! Every frame on the wire carries:
//! - A 4-byte magic sequence (`DE AD BE EF`) for stream synchronisation
//! - A 2-byte little-endian payload length
//! - A 2-byte little-endian CRC-16/XMODEM over `variant ‖ payload`
//! - A 1-byte packet variant tag
//!
//! Sync loss, integrity failures and short reads are recovered inside the
//! [`FrameDecoder`]; callers only ever see whole, verified frames.

pub mod codec;
pub mod crc;
pub mod decoder;
pub mod error;
pub mod writer;

pub use codec::{
    encode_frame, FrameConfig, RawFrame, ResyncPolicy, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC,
};
pub use crc::{crc16, crc16_le_bytes};
pub use decoder::{DecoderStats, DropReason, FrameDecoder, FramePoll};
pub use error::{FrameError, Result};
pub use writer::FrameWriter;
