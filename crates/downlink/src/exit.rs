use std::fmt;
use std::io;

use downlink_frame::FrameError;
use downlink_hub::HubError;
use downlink_schema::SchemaError;
use downlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::AddrInUse => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Open { source, .. } if source.kind() == io::ErrorKind::PermissionDenied => {
            CliError::new(PERMISSION_DENIED, format!("{context}: {source}"))
        }
        TransportError::UnsupportedBaud(_) => CliError::usage(format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Source(err) => transport_error(context, err),
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn schema_error(context: &str, err: SchemaError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn hub_error(context: &str, err: HubError) -> CliError {
    match err {
        HubError::Schema(err) => schema_error(context, err),
        HubError::Frame(err) => frame_error(context, err),
        HubError::Io(err) => io_error(context, err),
        HubError::Aggregate(_) | HubError::Json(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        HubError::ServiceStopped => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_transport_failures() {
        let err = transport_error("open failed", TransportError::Closed);
        assert_eq!(err.code, TRANSPORT_ERROR);

        let err = transport_error("open failed", TransportError::UnsupportedBaud(1234));
        assert_eq!(err.code, USAGE);

        let denied = TransportError::Open {
            path: "/dev/ttyS0".into(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(transport_error("open failed", denied).code, PERMISSION_DENIED);
    }

    #[test]
    fn schema_errors_are_data_invalid() {
        let err = schema_error("load failed", SchemaError::UnknownVariant('Z'));
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.to_string().starts_with("load failed: "));
    }

    #[test]
    fn frame_source_errors_unwrap_to_transport() {
        let err = frame_error("decode failed", FrameError::Source(TransportError::Closed));
        assert_eq!(err.code, TRANSPORT_ERROR);
    }
}
