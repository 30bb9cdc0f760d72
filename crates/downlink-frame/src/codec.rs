use bytes::{BufMut, Bytes, BytesMut};

use crate::crc::{crc16, crc16_update};
use crate::error::{FrameError, Result};

/// Frame header: magic (4) + length (2) + crc (2) + variant (1) = 9 bytes.
pub const HEADER_SIZE: usize = 9;

/// Magic bytes shared with the sender firmware.
pub const MAGIC: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

/// Default maximum payload length accepted by the decoder.
///
/// The firmware's largest packet is well under this; anything bigger is a
/// corrupted length field.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024;

/// A verified frame: the variant tag and its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Packet variant tag (an ASCII letter on the current firmware).
    pub variant: u8,
    /// The payload bytes, excluding header and variant.
    pub payload: Bytes,
}

impl RawFrame {
    /// Create a new frame.
    pub fn new(variant: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            variant,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Variant tag rendered as a character.
    pub fn variant_char(&self) -> char {
        char::from(self.variant)
    }
}

/// Fixed-width fields following the magic sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub length: usize,
    pub crc: u16,
    pub variant: u8,
}

impl FrameHeader {
    /// Parse the 5 bytes after the magic: length LE, crc LE, variant.
    pub(crate) fn parse(bytes: &[u8]) -> Self {
        Self {
            length: usize::from(u16::from_le_bytes([bytes[0], bytes[1]])),
            crc: u16::from_le_bytes([bytes[2], bytes[3]]),
            variant: bytes[4],
        }
    }
}

/// CRC over `variant ‖ payload`, the region the firmware protects.
pub(crate) fn frame_crc(variant: u8, payload: &[u8]) -> u16 {
    crc16_update(crc16(&[variant]), payload)
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌─────────────┬──────────┬──────────┬─────────┬──────────────────┐
/// │ Magic (4B)  │ Length   │ CRC-16   │ Variant │ Payload          │
/// │ DE AD BE EF │ (2B LE)  │ (2B LE)  │ (1B)    │ (Length bytes)   │
/// └─────────────┴──────────┴──────────┴─────────┴──────────────────┘
/// ```
pub fn encode_frame(variant: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let length = u16::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: usize::from(u16::MAX),
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u16_le(length);
    dst.put_u16_le(frame_crc(variant, payload));
    dst.put_u8(variant);
    dst.put_slice(payload);
    Ok(())
}

/// How the decoder recovers after a sync loss or integrity failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResyncPolicy {
    /// Keep buffered bytes and skip ahead to the next magic sequence.
    #[default]
    Scan,
    /// Drop everything buffered, locally and on the source, then re-seek.
    ///
    /// This can discard a genuine header that arrived in the same burst.
    Flush,
}

/// Configuration for the frame decoder and writer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload length. Larger length fields count as sync loss.
    pub max_payload_size: usize,
    /// Recovery policy after sync or integrity failures.
    pub resync: ResyncPolicy,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            resync: ResyncPolicy::default(),
        }
    }
}
