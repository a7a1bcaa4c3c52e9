/// Protocol framing and parsing errors.
#[derive(Debug)]
pub enum ProtocolError {
    /// Message length field is below the protocol minimum or negative.
    InvalidLength(i32),
    /// Message payload exceeds the configured maximum.
    MessageTooLarge(usize),
    /// Message body could not be parsed.
    InvalidMessage,
    /// Startup message carried an unsupported protocol version.
    UnsupportedProtocolVersion(i32),
    /// A required startup parameter was absent.
    MissingParameter(&'static str),
    /// A string field was not valid UTF-8.
    InvalidUtf8,
    /// The leading type byte is not a known frontend message.
    UnknownMessageType(u8),
    /// A message arrived that is not legal in the current protocol phase.
    OutOfOrderMessage(&'static str),
    Io(std::io::Error),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::InvalidLength(n) => write!(f, "invalid message length: {}", n),
            ProtocolError::MessageTooLarge(n) => {
                write!(f, "message of {} bytes exceeds the configured maximum", n)
            }
            ProtocolError::InvalidMessage => write!(f, "invalid message"),
            ProtocolError::UnsupportedProtocolVersion(v) => {
                write!(f, "unsupported protocol version: {}", v)
            }
            ProtocolError::MissingParameter(p) => write!(f, "missing parameter: {}", p),
            ProtocolError::InvalidUtf8 => write!(f, "invalid UTF-8"),
            ProtocolError::UnknownMessageType(t) => {
                write!(f, "unknown message type: 0x{:02x}", t)
            }
            ProtocolError::OutOfOrderMessage(what) => {
                write!(f, "unexpected message: {}", what)
            }
            ProtocolError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Io(e)
    }
}

impl From<ProtocolError> for std::io::Error {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
