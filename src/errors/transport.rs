use std::time::Duration;
use thiserror::Error;

use super::{IoOperation, SerialErrorKind};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Serial port error: {kind} on {port} - {details}")]
    Serial {
        kind: SerialErrorKind,
        port: String,
        details: String,
        #[source]
        source: Option<serialport::Error>,
    },

    #[error("I/O error: {operation} failed - {details}")]
    Io {
        operation: IoOperation,
        details: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No response within {limit:?} (waited {elapsed:?})")]
    Timeout { elapsed: Duration, limit: Duration },

    #[error("Transport not connected")]
    NotConnected,

    #[error("Connection lost")]
    ConnectionLost,
}

impl TransportError {
    pub fn timeout(elapsed: Duration, limit: Duration) -> Self {
        TransportError::Timeout { elapsed, limit }
    }

    pub fn io(operation: IoOperation, details: impl Into<String>, source: std::io::Error) -> Self {
        TransportError::Io {
            operation,
            details: details.into(),
            source,
        }
    }

    /// True for errors after which the underlying stream is unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionLost | TransportError::NotConnected
        )
    }
}

impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        match err.kind {
            serialport::ErrorKind::NoDevice => TransportError::Serial {
                kind: SerialErrorKind::OpenFailed,
                port: err.to_string(),
                details: "Device not found".into(),
                source: Some(err),
            },
            serialport::ErrorKind::InvalidInput => TransportError::Serial {
                kind: SerialErrorKind::ConfigurationFailed,
                port: err.to_string(),
                details: "Invalid configuration".into(),
                source: Some(err),
            },
            serialport::ErrorKind::Io(io_err) => TransportError::Io {
                operation: match io_err {
                    std::io::ErrorKind::TimedOut => IoOperation::Read,
                    std::io::ErrorKind::WriteZero => IoOperation::Write,
                    _ => IoOperation::Exchange,
                },
                details: io_err.to_string(),
                source: std::io::Error::new(io_err, err.description),
            },
            _ => TransportError::Serial {
                kind: SerialErrorKind::OpenFailed,
                port: err.to_string(),
                details: err.to_string(),
                source: Some(err),
            },
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => TransportError::ConnectionLost,
            kind => TransportError::Io {
                operation: match kind {
                    std::io::ErrorKind::TimedOut => IoOperation::Read,
                    std::io::ErrorKind::WouldBlock => IoOperation::Read,
                    std::io::ErrorKind::WriteZero => IoOperation::Write,
                    _ => IoOperation::Exchange,
                },
                details: err.to_string(),
                source: err,
            },
        }
    }
}
