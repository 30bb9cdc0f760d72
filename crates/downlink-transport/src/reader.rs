use std::io::{ErrorKind, Read};

use crate::error::{Result, TransportError};
use crate::traits::ByteSource;

/// Adapts any `Read` stream (capture file, stdin, socket) into a byte source.
///
/// `WouldBlock` and `TimedOut` from the inner stream count as an elapsed
/// timeout. End of stream is reported as [`TransportError::Closed`] once no
/// more bytes can be returned.
pub struct ReaderSource<R> {
    inner: R,
}

impl<R: Read> ReaderSource<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Borrow the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Consume the source and return the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> ByteSource for ReaderSource<R> {
    fn read_bounded(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0usize;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Err(TransportError::Closed),
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    break
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        Ok(filled)
    }

    fn discard_pending(&mut self) -> Result<usize> {
        // A plain reader cannot tell what has already arrived.
        Ok(0)
    }

    fn pending(&mut self) -> Result<usize> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn reads_until_buffer_full() {
        let mut source = ReaderSource::new(Cursor::new(vec![1u8, 2, 3, 4, 5]));
        let mut buf = [0u8; 3];
        assert_eq!(source.read_bounded(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn short_read_at_end_then_closed() {
        let mut source = ReaderSource::new(Cursor::new(vec![9u8, 8]));
        let mut buf = [0u8; 4];
        assert_eq!(source.read_bounded(&mut buf).unwrap(), 2);
        assert!(matches!(
            source.read_bounded(&mut buf),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn would_block_is_a_timeout() {
        struct Stalled;
        impl Read for Stalled {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(ErrorKind::WouldBlock))
            }
        }

        let mut source = ReaderSource::new(Stalled);
        let mut buf = [0u8; 4];
        assert_eq!(source.read_bounded(&mut buf).unwrap(), 0);
    }

    #[test]
    fn interrupted_read_retries() {
        struct InterruptedOnce {
            fired: bool,
        }
        impl Read for InterruptedOnce {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if !self.fired {
                    self.fired = true;
                    return Err(std::io::Error::from(ErrorKind::Interrupted));
                }
                buf[0] = 0xAA;
                Ok(1)
            }
        }

        let mut source = ReaderSource::new(InterruptedOnce { fired: false });
        let mut buf = [0u8; 1];
        assert_eq!(source.read_bounded(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 0xAA);
    }

    #[test]
    fn hard_errors_propagate() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(ErrorKind::BrokenPipe))
            }
        }

        let mut source = ReaderSource::new(Broken);
        let mut buf = [0u8; 1];
        assert!(matches!(
            source.read_bounded(&mut buf),
            Err(TransportError::Io(e)) if e.kind() == ErrorKind::BrokenPipe
        ));
    }
}
