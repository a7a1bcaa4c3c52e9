use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;

use crate::protocol::codec::{put_cstring, MessageCodec, StartupCodec};
use crate::protocol::error::ProtocolError;
use crate::protocol::types::{ErrorFieldCode, FormatCode};

/// SQL State codes for error responses.
///
/// References:
/// - <https://www.postgresql.org/docs/current/errcodes-appendix.html>
pub mod sql_state {
    /// Protocol violation (malformed frame, out-of-order message)
    pub const PROTOCOL_VIOLATION: &str = "08P01";

    /// Invalid password / authentication failed
    pub const INVALID_PASSWORD: &str = "28P01";

    /// Invalid SQL statement name (prepared statement does not exist)
    pub const INVALID_SQL_STATEMENT_NAME: &str = "26000";

    /// Invalid cursor name (portal does not exist)
    pub const INVALID_CURSOR_NAME: &str = "34000";

    /// Duplicate prepared statement
    pub const DUPLICATE_PREPARED_STATEMENT: &str = "42P05";

    /// Query canceled on user request
    pub const QUERY_CANCELED: &str = "57014";

    /// System error (external to the database itself)
    pub const SYSTEM_ERROR: &str = "58000";

    /// Internal error
    pub const INTERNAL_ERROR: &str = "XX000";
}

/// Authentication subcodes carried inside 'R' messages.
mod auth_code {
    pub const OK: i32 = 0;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Messages sent by the backend (server) to the client.
#[derive(Debug)]
pub enum BackendMessage {
    /// 'R' - Authentication completed
    AuthenticationOk,
    /// 'R' - Request a cleartext password
    AuthenticationCleartextPassword,
    /// 'R' - Request an MD5-hashed password using the given salt
    AuthenticationMd5Password { salt: [u8; 4] },
    /// 'R' - Offer SASL authentication with the given mechanisms
    AuthenticationSasl { mechanisms: Vec<String> },
    /// 'R' - SASL challenge data (server-first-message)
    AuthenticationSaslContinue { data: Vec<u8> },
    /// 'R' - SASL completion data (server-final-message)
    AuthenticationSaslFinal { data: Vec<u8> },
    /// 'K' - Backend key data for cancel requests
    BackendKeyData { process_id: i32, secret_key: i32 },
    /// 'S' - Parameter status notification
    ParameterStatus { name: String, value: String },
    /// 'Z' - Ready for query
    ReadyForQuery { status: TransactionStatus },
    /// 'E' - Error response
    ErrorResponse { fields: Vec<ErrorField> },
    /// 'T' - Row description (column metadata)
    RowDescription { fields: Vec<FieldDescription> },
    /// 'D' - Data row
    DataRow { values: Vec<DataValue> },
    /// 'C' - Command complete
    CommandComplete { tag: String },
    /// 'I' - Empty query response
    EmptyQueryResponse,
    /// '1' - Parse complete
    ParseComplete,
    /// '2' - Bind complete
    BindComplete,
    /// '3' - Close complete
    CloseComplete,
    /// 'n' - No data
    NoData,
    /// 's' - Portal suspended
    PortalSuspended,
    /// 't' - Parameter description
    ParameterDescription { param_types: Vec<u32> },
}

impl BackendMessage {
    /// Returns the message type byte.
    fn ty(&self) -> u8 {
        match self {
            BackendMessage::AuthenticationOk
            | BackendMessage::AuthenticationCleartextPassword
            | BackendMessage::AuthenticationMd5Password { .. }
            | BackendMessage::AuthenticationSasl { .. }
            | BackendMessage::AuthenticationSaslContinue { .. }
            | BackendMessage::AuthenticationSaslFinal { .. } => b'R',
            BackendMessage::BackendKeyData { .. } => b'K',
            BackendMessage::ParameterStatus { .. } => b'S',
            BackendMessage::ReadyForQuery { .. } => b'Z',
            BackendMessage::ErrorResponse { .. } => b'E',
            BackendMessage::RowDescription { .. } => b'T',
            BackendMessage::DataRow { .. } => b'D',
            BackendMessage::CommandComplete { .. } => b'C',
            BackendMessage::EmptyQueryResponse => b'I',
            BackendMessage::ParseComplete => b'1',
            BackendMessage::BindComplete => b'2',
            BackendMessage::CloseComplete => b'3',
            BackendMessage::NoData => b'n',
            BackendMessage::PortalSuspended => b's',
            BackendMessage::ParameterDescription { .. } => b't',
        }
    }

    /// Encodes this message into the given BytesMut buffer.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.ty());

        let len_pos = dst.len();
        dst.put_i32(0); // placeholder

        self.encode_body(dst);

        let total_len = (dst.len() - len_pos) as i32;
        dst[len_pos..][..4].copy_from_slice(&total_len.to_be_bytes());
    }

    /// Encodes the body of this message into the given BytesMut buffer.
    fn encode_body(&self, dst: &mut BytesMut) {
        match self {
            BackendMessage::AuthenticationOk => {
                dst.put_i32(auth_code::OK);
            }
            BackendMessage::AuthenticationCleartextPassword => {
                dst.put_i32(auth_code::CLEARTEXT_PASSWORD);
            }
            BackendMessage::AuthenticationMd5Password { salt } => {
                dst.put_i32(auth_code::MD5_PASSWORD);
                dst.put_slice(salt);
            }
            BackendMessage::AuthenticationSasl { mechanisms } => {
                dst.put_i32(auth_code::SASL);
                for mechanism in mechanisms {
                    put_cstring(dst, mechanism);
                }
                dst.put_u8(0); // terminator
            }
            BackendMessage::AuthenticationSaslContinue { data } => {
                dst.put_i32(auth_code::SASL_CONTINUE);
                dst.put_slice(data);
            }
            BackendMessage::AuthenticationSaslFinal { data } => {
                dst.put_i32(auth_code::SASL_FINAL);
                dst.put_slice(data);
            }
            BackendMessage::BackendKeyData {
                process_id,
                secret_key,
            } => {
                dst.put_i32(*process_id);
                dst.put_i32(*secret_key);
            }
            BackendMessage::ParameterStatus { name, value } => {
                put_cstring(dst, name);
                put_cstring(dst, value);
            }
            BackendMessage::ReadyForQuery { status } => {
                dst.put_u8(status.as_byte());
            }
            BackendMessage::ErrorResponse { fields } => {
                for field in fields {
                    field.encode(dst);
                }
                dst.put_u8(0); // terminator
            }
            BackendMessage::RowDescription { fields } => {
                dst.put_i16(fields.len() as i16);
                for field in fields {
                    field.encode(dst);
                }
            }
            BackendMessage::DataRow { values } => {
                dst.put_i16(values.len() as i16);
                for value in values {
                    value.encode(dst);
                }
            }
            BackendMessage::CommandComplete { tag } => {
                put_cstring(dst, tag);
            }
            BackendMessage::EmptyQueryResponse
            | BackendMessage::ParseComplete
            | BackendMessage::BindComplete
            | BackendMessage::CloseComplete
            | BackendMessage::NoData
            | BackendMessage::PortalSuspended => {
                // No body for these messages
            }
            BackendMessage::ParameterDescription { param_types } => {
                dst.put_i16(param_types.len() as i16);
                for oid in param_types {
                    dst.put_u32(*oid);
                }
            }
        }
    }
}

impl Encoder<BackendMessage> for StartupCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: BackendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        msg.encode(dst);
        Ok(())
    }
}

impl Encoder<BackendMessage> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: BackendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        msg.encode(dst);
        Ok(())
    }
}

/// Transaction status indicator for ReadyForQuery message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// 'I' - Idle (not in a transaction block)
    Idle,
    /// 'T' - In a transaction block
    InTransaction,
    /// 'E' - In a failed transaction block
    Failed,
}

impl TransactionStatus {
    fn as_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }
}

/// Error/Notice field.
#[derive(Debug)]
pub struct ErrorField {
    pub code: ErrorFieldCode,
    pub value: String,
}

impl ErrorField {
    /// Creates a new error field.
    pub fn new(code: ErrorFieldCode, value: impl Into<String>) -> Self {
        Self {
            code,
            value: value.into(),
        }
    }

    /// Encodes this error field into the given BytesMut buffer.
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.code.as_u8());
        put_cstring(dst, &self.value);
    }
}

/// Structured error information for PostgreSQL error responses.
///
/// Query callbacks return `ErrorInfo` to report a failure with a specific
/// SQLSTATE; the session translates it into a wire `ErrorResponse`.
///
/// # Examples
///
/// ```rust
/// use pgfront::protocol::{sql_state, ErrorInfo};
///
/// // Simple error (severity defaults to "ERROR", SQLSTATE to XX000)
/// let err = ErrorInfo::new("something broke");
///
/// // Error with an explicit SQLSTATE and hint
/// let err = ErrorInfo::with_code(sql_state::SYSTEM_ERROR, "backend unavailable")
///     .hint("retry later");
/// ```
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Severity level (ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG)
    pub severity: &'static str,
    /// SQLSTATE code (e.g., "57014" for a canceled query)
    pub code: String,
    /// Primary human-readable error message
    pub message: String,
    /// Optional detail message
    pub detail: Option<String>,
    /// Optional hint message
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error with the default SQLSTATE (`XX000`).
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_code(sql_state::INTERNAL_ERROR, message)
    }

    /// Creates a new error with the given SQLSTATE.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: "ERROR",
            code: code.into(),
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    /// Sets the severity level.
    ///
    /// Common values: "ERROR", "FATAL", "PANIC", "WARNING", "NOTICE"
    pub fn severity(mut self, severity: &'static str) -> Self {
        self.severity = severity;
        self
    }

    /// Attaches a detail message.
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attaches a hint message.
    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.code)
    }
}

impl std::error::Error for ErrorInfo {}

impl From<ErrorInfo> for BackendMessage {
    fn from(info: ErrorInfo) -> Self {
        let mut fields = vec![
            ErrorField::new(ErrorFieldCode::Severity, info.severity),
            ErrorField::new(ErrorFieldCode::SeverityNonLocalized, info.severity),
            ErrorField::new(ErrorFieldCode::SqlState, info.code),
            ErrorField::new(ErrorFieldCode::Message, info.message),
        ];

        if let Some(detail) = info.detail {
            fields.push(ErrorField::new(ErrorFieldCode::Detail, detail));
        }

        if let Some(hint) = info.hint {
            fields.push(ErrorField::new(ErrorFieldCode::Hint, hint));
        }

        BackendMessage::ErrorResponse { fields }
    }
}

/// A single column value in a data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataValue {
    /// SQL NULL value (encoded as length -1)
    Null,
    /// Non-NULL value (encoded as length + data bytes)
    Data(Vec<u8>),
}

impl DataValue {
    /// Encodes this data value into the given BytesMut buffer.
    fn encode(&self, dst: &mut BytesMut) {
        match self {
            DataValue::Null => dst.put_i32(-1),
            DataValue::Data(bytes) => {
                dst.put_i32(bytes.len() as i32);
                dst.put_slice(bytes);
            }
        }
    }
}

/// Field description for RowDescription message.
#[derive(Debug, Clone)]
pub struct FieldDescription {
    /// Column name
    pub name: String,
    /// Table OID (0 if not from a table)
    pub table_oid: i32,
    /// Column attribute number (0 if not from a table)
    pub column_id: i16,
    /// Data type OID
    pub type_oid: u32,
    /// Data type size (-1 for variable length)
    pub type_size: i16,
    /// Type modifier (-1 if not applicable)
    pub type_modifier: i32,
    /// Format code
    pub format_code: FormatCode,
}

impl FieldDescription {
    /// Encodes this field description into the given BytesMut buffer.
    fn encode(&self, dst: &mut BytesMut) {
        put_cstring(dst, &self.name);
        dst.put_i32(self.table_oid);
        dst.put_i16(self.column_id);
        dst.put_u32(self.type_oid);
        dst.put_i16(self.type_size);
        dst.put_i32(self.type_modifier);
        dst.put_i16(self.format_code.as_i16());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use tokio_util::codec::Encoder;

    use crate::datum::oid;

    /// Helper to encode a message and return the buffer.
    fn encode_message(msg: BackendMessage) -> Vec<u8> {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(msg, &mut buf).unwrap();
        buf.to_vec()
    }

    /// Helper to read i32 from buffer at offset.
    fn read_i32(buf: &[u8], offset: usize) -> i32 {
        i32::from_be_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ])
    }

    /// Helper to read i16 from buffer at offset.
    fn read_i16(buf: &[u8], offset: usize) -> i16 {
        i16::from_be_bytes([buf[offset], buf[offset + 1]])
    }

    #[test]
    fn test_write_authentication_ok() {
        let msg = BackendMessage::AuthenticationOk;
        let buf = encode_message(msg);
        assert_eq!(buf, vec![b'R', 0, 0, 0, 8, 0, 0, 0, 0]);
    }

    #[test]
    fn test_write_authentication_cleartext() {
        let msg = BackendMessage::AuthenticationCleartextPassword;
        let buf = encode_message(msg);
        assert_eq!(buf, vec![b'R', 0, 0, 0, 8, 0, 0, 0, 3]);
    }

    #[test]
    fn test_write_authentication_md5() {
        let msg = BackendMessage::AuthenticationMd5Password {
            salt: [0xde, 0xad, 0xbe, 0xef],
        };
        let buf = encode_message(msg);
        assert_eq!(buf, vec![b'R', 0, 0, 0, 12, 0, 0, 0, 5, 0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_write_authentication_sasl() {
        let msg = BackendMessage::AuthenticationSasl {
            mechanisms: vec!["SCRAM-SHA-256".to_string()],
        };
        let buf = encode_message(msg);

        assert_eq!(buf[0], b'R');
        assert_eq!(read_i32(&buf, 1), 4 + 4 + 14 + 1);
        assert_eq!(read_i32(&buf, 5), 10);
        assert_eq!(&buf[9..23], b"SCRAM-SHA-256\x00");
        assert_eq!(buf[23], 0); // list terminator
    }

    #[test]
    fn test_write_backend_key_data() {
        let msg = BackendMessage::BackendKeyData {
            process_id: 12345,
            secret_key: 67890,
        };
        let buf = encode_message(msg);

        assert_eq!(buf[0], b'K');
        assert_eq!(read_i32(&buf, 1), 12); // length = 4 + 8 = 12
        assert_eq!(read_i32(&buf, 5), 12345); // process_id
        assert_eq!(read_i32(&buf, 9), 67890); // secret_key
    }

    #[test]
    fn test_write_parameter_status() {
        let msg = BackendMessage::ParameterStatus {
            name: "server_version".to_string(),
            value: "16.0".to_string(),
        };
        let buf = encode_message(msg);

        assert_eq!(buf[0], b'S');
        assert_eq!(read_i32(&buf, 1), 24); // length = 4 + 15 + 5 = 24
        assert_eq!(&buf[5..], b"server_version\x0016.0\x00");
    }

    #[test]
    fn test_write_ready_for_query() {
        let msg = BackendMessage::ReadyForQuery {
            status: TransactionStatus::Idle,
        };
        let buf = encode_message(msg);
        assert_eq!(buf, vec![b'Z', 0, 0, 0, 5, b'I']);
    }

    #[test]
    fn test_write_error_response() {
        let error = ErrorInfo::with_code(sql_state::INVALID_CURSOR_NAME, "portal does not exist");
        let msg: BackendMessage = error.into();
        let buf = encode_message(msg);

        assert_eq!(buf[0], b'E');
        // Fields: S=ERROR(7), V=ERROR(7), C=34000(7), M=portal does not exist(23)
        assert_eq!(read_i32(&buf, 1), 4 + 7 + 7 + 7 + 23 + 1);

        assert_eq!(buf[5], b'S');
        assert_eq!(&buf[6..12], b"ERROR\x00");
        assert_eq!(buf[12], b'V');
        assert_eq!(&buf[13..19], b"ERROR\x00");
        assert_eq!(buf[19], b'C');
        assert_eq!(&buf[20..26], b"34000\x00");
        assert_eq!(buf[26], b'M');
        assert_eq!(&buf[27..49], b"portal does not exist\x00");
        assert_eq!(buf[49], 0); // terminator
    }

    #[test]
    fn test_write_error_response_with_hint() {
        let error = ErrorInfo::new("broken").hint("fix it");
        let msg: BackendMessage = error.into();
        let buf = encode_message(msg);

        assert_eq!(buf[0], b'E');
        assert!(buf.windows(8).any(|w| w == b"Hfix it\x00"));
    }

    #[test]
    fn test_write_row_description() {
        let msg = BackendMessage::RowDescription {
            fields: vec![
                FieldDescription {
                    name: "col".to_string(),
                    table_oid: 0,
                    column_id: 0,
                    type_oid: oid::INT4,
                    type_size: 4,
                    type_modifier: -1,
                    format_code: FormatCode::Text,
                },
                FieldDescription {
                    name: "text_col".to_string(),
                    table_oid: 16384,
                    column_id: 2,
                    type_oid: oid::TEXT,
                    type_size: -1,
                    type_modifier: -1,
                    format_code: FormatCode::Text,
                },
            ],
        };
        let buf = encode_message(msg);

        assert_eq!(buf[0], b'T');
        assert_eq!(read_i16(&buf, 5), 2); // field count
    }

    #[test]
    fn test_write_data_row() {
        let msg = BackendMessage::DataRow {
            values: vec![
                DataValue::Data(b"hello".to_vec()), // non-empty value
                DataValue::Data(vec![]),            // empty value
                DataValue::Null,                    // NULL
            ],
        };
        let buf = encode_message(msg);

        assert_eq!(buf[0], b'D');
        assert_eq!(read_i16(&buf, 5), 3); // column count

        assert_eq!(read_i32(&buf, 7), 5); // length of "hello"
        assert_eq!(&buf[11..16], b"hello");
        assert_eq!(read_i32(&buf, 16), 0); // empty value
        assert_eq!(read_i32(&buf, 20), -1); // NULL
    }

    #[test]
    fn test_write_command_complete() {
        let msg = BackendMessage::CommandComplete {
            tag: "SELECT 1".to_string(),
        };
        let buf = encode_message(msg);

        assert_eq!(buf[0], b'C');
        assert_eq!(read_i32(&buf, 1), 13); // 4 + 9
        assert_eq!(&buf[5..], b"SELECT 1\x00");
    }

    #[test]
    fn test_write_empty_query_response() {
        let msg = BackendMessage::EmptyQueryResponse;
        let buf = encode_message(msg);
        assert_eq!(buf, vec![b'I', 0, 0, 0, 4]);
    }

    #[test]
    fn test_write_extended_completions() {
        assert_eq!(encode_message(BackendMessage::ParseComplete), vec![b'1', 0, 0, 0, 4]);
        assert_eq!(encode_message(BackendMessage::BindComplete), vec![b'2', 0, 0, 0, 4]);
        assert_eq!(encode_message(BackendMessage::CloseComplete), vec![b'3', 0, 0, 0, 4]);
        assert_eq!(encode_message(BackendMessage::NoData), vec![b'n', 0, 0, 0, 4]);
        assert_eq!(encode_message(BackendMessage::PortalSuspended), vec![b's', 0, 0, 0, 4]);
    }

    #[test]
    fn test_write_parameter_description() {
        let msg = BackendMessage::ParameterDescription {
            param_types: vec![oid::INT4, oid::TEXT, oid::VARCHAR],
        };
        let buf = encode_message(msg);

        assert_eq!(buf[0], b't');
        assert_eq!(read_i32(&buf, 1), 18); // 4 + 2 + 3*4
        assert_eq!(read_i16(&buf, 5), 3); // param count
        assert_eq!(read_i32(&buf, 7) as u32, oid::INT4);
        assert_eq!(read_i32(&buf, 11) as u32, oid::TEXT);
        assert_eq!(read_i32(&buf, 15) as u32, oid::VARCHAR);
    }
}
