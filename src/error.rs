//! Crate-level error taxonomy.
//!
//! Each variant maps to a wire-level policy: some errors are reported and
//! the connection is closed, some latch the session into the failed state
//! until `Sync`, and transport errors abandon the session outright.

use crate::protocol::{sql_state, ErrorInfo, ProtocolError};
use crate::writer::WriterError;

/// A failure inside a running session.
#[derive(Debug)]
pub enum Error {
    /// Malformed frame or out-of-order message. Reported as `08P01`, then
    /// the stream is closed.
    Protocol(ProtocolError),
    /// Result-stream misuse or value encoding failure. Reported with the
    /// session latched until `Sync`.
    Writer(WriterError),
    /// A user callback returned an error. Reported with the callback's
    /// SQLSTATE (default `XX000`), session latched until `Sync`.
    Callback(ErrorInfo),
    /// Cooperative cancellation was delivered. Reported as `57014`.
    Cancelled,
    /// Transport failure; the session is abandoned.
    Io(std::io::Error),
}

impl Error {
    /// Renders this error as wire `ErrorResponse` content.
    pub(crate) fn to_error_info(&self) -> ErrorInfo {
        match self {
            Error::Protocol(e) => {
                ErrorInfo::with_code(sql_state::PROTOCOL_VIOLATION, e.to_string())
                    .severity("FATAL")
            }
            Error::Writer(e) => ErrorInfo::with_code(sql_state::INTERNAL_ERROR, e.to_string()),
            Error::Callback(info) => info.clone(),
            Error::Cancelled => ErrorInfo::with_code(
                sql_state::QUERY_CANCELED,
                "canceling statement due to user request",
            ),
            Error::Io(e) => {
                ErrorInfo::with_code(sql_state::SYSTEM_ERROR, e.to_string()).severity("FATAL")
            }
        }
    }

    /// True when the error terminates the connection instead of latching
    /// the session until the next `Sync`.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::Io(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Protocol(e) => write!(f, "protocol error: {}", e),
            Error::Writer(e) => write!(f, "writer error: {}", e),
            Error::Callback(e) => write!(f, "callback error: {}", e),
            Error::Cancelled => write!(f, "query cancelled"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Io(e) => Error::Io(e),
            other => Error::Protocol(other),
        }
    }
}

impl From<WriterError> for Error {
    fn from(e: WriterError) -> Self {
        Error::Writer(e)
    }
}

impl From<ErrorInfo> for Error {
    fn from(e: ErrorInfo) -> Self {
        Error::Callback(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
