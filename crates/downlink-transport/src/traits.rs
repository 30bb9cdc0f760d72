use std::time::Duration;

use crate::error::Result;

/// Default line rate of the vehicle's telemetry radio.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default per-read wait before a short read is returned.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// A sequential byte stream with a bounded-wait read primitive.
///
/// Implementations never block indefinitely: a read that cannot be
/// satisfied before the source's timeout returns whatever arrived, which
/// may be nothing. End of stream and device failure are reported as
/// errors, never as a zero-length read.
pub trait ByteSource {
    /// Read up to `buf.len()` bytes, waiting at most one timeout period.
    ///
    /// Returns the number of bytes written into `buf`. A value smaller than
    /// `buf.len()` means the timeout elapsed first.
    fn read_bounded(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Discard every byte currently buffered by the source.
    ///
    /// Returns the number of bytes dropped when the source can tell.
    fn discard_pending(&mut self) -> Result<usize>;

    /// Number of bytes that can be read right now without waiting.
    fn pending(&mut self) -> Result<usize>;
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read_bounded(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_bounded(buf)
    }

    fn discard_pending(&mut self) -> Result<usize> {
        (**self).discard_pending()
    }

    fn pending(&mut self) -> Result<usize> {
        (**self).pending()
    }
}

/// Line settings for opening a byte source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceConfig {
    /// Serial line rate in bits per second. Ignored by non-serial sources.
    pub baud_rate: u32,
    /// Maximum wait for a single read. Default: 1 second.
    pub read_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}
