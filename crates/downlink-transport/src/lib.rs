//! Bounded-wait byte sources for the telemetry downlink.
//!
//! Every source implements [`ByteSource`]: a sequential byte stream whose
//! read primitive returns fewer bytes than requested once the configured
//! timeout elapses, instead of blocking indefinitely.
//!
//! - [`SerialPort`]: raw termios serial tty (Linux/macOS)
//! - [`ReaderSource`]: any `std::io::Read` (capture files, stdin, sockets)
//! - [`MemorySource`]: in-memory queue fed through a [`MemoryFeed`]
//!
//! This is the lowest layer of downlink. Frame decoding builds on top of
//! the [`ByteSource`] trait provided here.

pub mod error;
pub mod memory;
pub mod reader;
pub mod traits;

#[cfg(unix)]
pub mod serial;

pub use error::{Result, TransportError};
pub use memory::{MemoryFeed, MemorySource};
pub use reader::ReaderSource;
pub use traits::{ByteSource, SourceConfig, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT};

#[cfg(unix)]
pub use serial::SerialPort;
