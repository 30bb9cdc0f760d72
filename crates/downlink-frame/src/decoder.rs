use bytes::{Buf, BytesMut};
use downlink_transport::ByteSource;
use tracing::{debug, trace, warn};

use crate::codec::{frame_crc, FrameConfig, FrameHeader, RawFrame, ResyncPolicy, HEADER_SIZE, MAGIC};
use crate::error::Result;

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Offsets of the fixed-width header fields.
const LENGTH_END: usize = MAGIC.len() + 2;
const CRC_END: usize = LENGTH_END + 2;

/// Outcome of a single decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePoll {
    /// A complete frame whose CRC matched.
    Frame(RawFrame),
    /// The source timed out mid-frame (or before any byte arrived).
    ///
    /// Buffered bytes are kept; the next call resumes where this one stopped.
    Incomplete,
    /// A frame was discarded and the decoder resynchronised.
    Dropped(DropReason),
}

/// Why a frame was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The four bytes at the cursor were not the magic sequence.
    SyncLost { found: [u8; 4] },
    /// The length field exceeded the configured maximum.
    Oversize { length: usize },
    /// The received CRC did not match the computed one.
    Integrity {
        variant: u8,
        expected: u16,
        received: u16,
    },
}

/// Observability counters for the decode loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames emitted.
    pub frames: u64,
    /// Magic mismatches.
    pub sync_errors: u64,
    /// Length fields over the configured maximum.
    pub oversize: u64,
    /// CRC mismatches.
    pub integrity_errors: u64,
    /// Calls that timed out before a frame completed.
    pub incomplete: u64,
    /// Bytes thrown away while resynchronising.
    pub bytes_discarded: u64,
}

/// Reads verified frames from a [`ByteSource`].
///
/// Each call to [`FrameDecoder::poll_frame`] walks the states
/// `seek header → length → crc → variant → payload → emit | drop`, issuing
/// one bounded-wait read per field that is not already buffered. It never
/// waits longer than one source timeout per field.
pub struct FrameDecoder<S> {
    source: S,
    buf: BytesMut,
    config: FrameConfig,
    stats: DecoderStats,
}

impl<S: ByteSource> FrameDecoder<S> {
    /// Create a decoder with default configuration.
    pub fn new(source: S) -> Self {
        Self::with_config(source, FrameConfig::default())
    }

    /// Create a decoder with explicit configuration.
    pub fn with_config(source: S, config: FrameConfig) -> Self {
        Self {
            source,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            stats: DecoderStats::default(),
        }
    }

    /// Attempt to produce one frame.
    ///
    /// Returns `Err` only when the byte source itself fails or closes.
    pub fn poll_frame(&mut self) -> Result<FramePoll> {
        if !self.fill(MAGIC.len())? {
            return Ok(self.incomplete());
        }
        if self.buf[..MAGIC.len()] != MAGIC {
            let found = [self.buf[0], self.buf[1], self.buf[2], self.buf[3]];
            self.stats.sync_errors += 1;
            let discarded = self.resync()?;
            debug!(?found, discarded, "header mismatch, resynchronising");
            return Ok(FramePoll::Dropped(DropReason::SyncLost { found }));
        }

        for end in [LENGTH_END, CRC_END, HEADER_SIZE] {
            if !self.fill(end)? {
                return Ok(self.incomplete());
            }
        }

        let header = FrameHeader::parse(&self.buf[MAGIC.len()..HEADER_SIZE]);
        if header.length > self.config.max_payload_size {
            self.stats.oversize += 1;
            let discarded = self.resync()?;
            debug!(
                length = header.length,
                max = self.config.max_payload_size,
                discarded,
                "length out of range, resynchronising"
            );
            return Ok(FramePoll::Dropped(DropReason::Oversize {
                length: header.length,
            }));
        }

        let total = HEADER_SIZE + header.length;
        if !self.fill(total)? {
            return Ok(self.incomplete());
        }

        let computed = frame_crc(header.variant, &self.buf[HEADER_SIZE..total]);
        if computed != header.crc {
            self.stats.integrity_errors += 1;
            let discarded = self.resync()?;
            warn!(
                variant = %char::from(header.variant),
                length = header.length,
                expected = format_args!("{computed:#06x}"),
                received = format_args!("{:#06x}", header.crc),
                discarded,
                "CRC check failed, dropping frame"
            );
            return Ok(FramePoll::Dropped(DropReason::Integrity {
                variant: header.variant,
                expected: computed,
                received: header.crc,
            }));
        }

        self.buf.advance(HEADER_SIZE);
        let payload = self.buf.split_to(header.length).freeze();
        self.stats.frames += 1;
        trace!(
            variant = %char::from(header.variant),
            length = header.length,
            "frame decoded"
        );

        Ok(FramePoll::Frame(RawFrame {
            variant: header.variant,
            payload,
        }))
    }

    /// Counters accumulated since construction.
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Bytes buffered locally and not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying source.
    pub fn get_ref(&self) -> &S {
        &self.source
    }

    /// Mutably borrow the underlying source.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Consume the decoder and return the source.
    pub fn into_inner(self) -> S {
        self.source
    }

    /// Current decoder configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn incomplete(&mut self) -> FramePoll {
        self.stats.incomplete += 1;
        FramePoll::Incomplete
    }

    /// Ensure at least `want` bytes are buffered, with one bounded read.
    fn fill(&mut self, want: usize) -> Result<bool> {
        let have = self.buf.len();
        if have >= want {
            return Ok(true);
        }
        self.buf.resize(want, 0);
        let read = match self.source.read_bounded(&mut self.buf[have..want]) {
            Ok(read) => read,
            Err(err) => {
                self.buf.truncate(have);
                return Err(err.into());
            }
        };
        self.buf.truncate(have + read);
        Ok(have + read == want)
    }

    fn resync(&mut self) -> Result<usize> {
        let discarded = match self.config.resync {
            ResyncPolicy::Flush => {
                let local = self.buf.len();
                self.buf.clear();
                local + self.source.discard_pending()?
            }
            ResyncPolicy::Scan => {
                self.absorb_pending()?;
                let skip = next_magic_candidate(&self.buf);
                self.buf.advance(skip);
                skip
            }
        };
        self.stats.bytes_discarded += discarded as u64;
        Ok(discarded)
    }

    /// Pull whatever the source already holds so the scan can see it.
    fn absorb_pending(&mut self) -> Result<()> {
        let pending = self.source.pending()?;
        if pending == 0 {
            return Ok(());
        }
        let have = self.buf.len();
        self.buf.resize(have + pending, 0);
        match self.source.read_bounded(&mut self.buf[have..]) {
            Ok(read) => {
                self.buf.truncate(have + read);
                Ok(())
            }
            Err(err) => {
                self.buf.truncate(have);
                Err(err.into())
            }
        }
    }
}

/// Offset of the first position after index 0 where the magic sequence (or
/// a prefix of it running into the end of the buffer) starts.
fn next_magic_candidate(buf: &[u8]) -> usize {
    (1..buf.len())
        .find(|&start| {
            let tail = &buf[start..];
            let n = tail.len().min(MAGIC.len());
            tail[..n] == MAGIC[..n]
        })
        .unwrap_or(buf.len())
}
