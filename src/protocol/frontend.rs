use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::protocol::codec::{
    get_cstring, split_startup_frame, split_typed_frame, MessageCodec, StartupCodec,
};
use crate::protocol::error::ProtocolError;
use crate::protocol::types::{FormatCode, TargetKind};

/// SSLRequest magic number
pub const SSL_REQUEST_CODE: i32 = (1234 << 16) | 5679; // 80877103

/// GSSENCRequest magic number
pub const GSSENC_REQUEST_CODE: i32 = (1234 << 16) | 5680; // 80877104

/// CancelRequest magic number
pub const CANCEL_REQUEST_CODE: i32 = (1234 << 16) | 5678; // 80877102

/// Protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 3 << 16; // 196608

/// Messages sent by the frontend (client) during startup phase.
#[derive(Debug)]
pub enum StartupMessage {
    /// SSLRequest - client wants to negotiate TLS
    SslRequest,
    /// GSSENCRequest - client wants GSSAPI encryption
    GssEncRequest,
    /// CancelRequest - client wants to cancel a running query
    CancelRequest { process_id: i32, secret_key: i32 },
    /// StartupMessage - normal connection startup
    Startup {
        protocol_version: i32,
        parameters: StartupParameters,
    },
}

/// Startup parameters from the client.
#[derive(Debug, Clone, Default)]
pub struct StartupParameters {
    pub user: String,
    pub database: Option<String>,
    pub application_name: Option<String>,
    /// Every parameter as sent, including the well-known keys above.
    pub all: HashMap<String, String>,
}

impl StartupMessage {
    /// Parses a startup-phase message body (the bytes following the length
    /// field).
    pub fn parse(src: &mut BytesMut) -> Result<Self, ProtocolError> {
        if src.len() < 4 {
            return Err(ProtocolError::InvalidMessage);
        }
        let code = src.get_i32();
        let remaining = src.len();

        match code {
            SSL_REQUEST_CODE if remaining == 0 => Ok(StartupMessage::SslRequest),
            GSSENC_REQUEST_CODE if remaining == 0 => Ok(StartupMessage::GssEncRequest),
            CANCEL_REQUEST_CODE if remaining == 8 => {
                let process_id = src.get_i32();
                let secret_key = src.get_i32();
                Ok(StartupMessage::CancelRequest {
                    process_id,
                    secret_key,
                })
            }
            SSL_REQUEST_CODE | GSSENC_REQUEST_CODE | CANCEL_REQUEST_CODE => {
                Err(ProtocolError::InvalidMessage)
            }
            version if (version >> 16) == 3 => {
                let parameters = Self::parse_startup_parameters(src)?;
                Ok(StartupMessage::Startup {
                    protocol_version: version,
                    parameters,
                })
            }
            other => Err(ProtocolError::UnsupportedProtocolVersion(other)),
        }
    }

    fn parse_startup_parameters(src: &mut BytesMut) -> Result<StartupParameters, ProtocolError> {
        let mut params = StartupParameters::default();

        while !src.is_empty() {
            let name = get_cstring(src)?;

            // Empty name signals end of parameters
            if name.is_empty() {
                break;
            }

            let value = get_cstring(src)?;

            match name.as_str() {
                "user" => params.user = value.clone(),
                "database" => params.database = Some(value.clone()),
                "application_name" => params.application_name = Some(value.clone()),
                _ => {}
            }
            params.all.insert(name, value);
        }

        if params.user.is_empty() {
            return Err(ProtocolError::MissingParameter("user"));
        }

        Ok(params)
    }
}

impl Decoder for StartupCodec {
    type Item = StartupMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(mut body) = split_startup_frame(src, self.max_message_size)? else {
            return Ok(None);
        };
        StartupMessage::parse(&mut body).map(Some)
    }
}

/// Messages sent by the frontend (client) during the query phase.
#[derive(Debug)]
pub enum FrontendMessage {
    /// 'Q' - Simple query
    Query(String),
    /// 'P' - Parse (extended query)
    Parse(ParseMessage),
    /// 'B' - Bind (extended query)
    Bind(BindMessage),
    /// 'D' - Describe a statement or portal
    Describe(DescribeMessage),
    /// 'E' - Execute a portal
    Execute(ExecuteMessage),
    /// 'C' - Close a statement or portal
    Close(CloseMessage),
    /// 'H' - Flush buffered output
    Flush,
    /// 'S' - Sync: end of an extended-query sequence
    Sync,
    /// 'X' - Terminate
    Terminate,
    /// 'p' - Password / SASL response. The payload layout depends on the
    /// authentication exchange in progress, so it is kept raw here.
    Password(Bytes),
}

/// Parse ('P') message payload.
#[derive(Debug)]
pub struct ParseMessage {
    /// Destination prepared-statement name ("" for the unnamed statement).
    pub name: String,
    /// The SQL text to prepare.
    pub query: String,
    /// Client-declared parameter type OIDs. Zero means "infer".
    pub parameter_oids: Vec<u32>,
}

/// Bind ('B') message payload.
#[derive(Debug)]
pub struct BindMessage {
    /// Destination portal name ("" for the unnamed portal).
    pub portal: String,
    /// Source prepared-statement name.
    pub statement: String,
    /// Parameter format codes: empty = all text, one = applies to all.
    pub parameter_formats: Vec<FormatCode>,
    /// Parameter values; `None` is NULL. Values are delivered to callbacks
    /// as text regardless of the advertised format code.
    pub parameters: Vec<Option<Bytes>>,
    /// Result column format codes: empty = all text, one = applies to all.
    pub result_formats: Vec<FormatCode>,
}

impl BindMessage {
    /// Resolves the format code for the parameter at `index` following the
    /// protocol's zero/one/N rule.
    pub fn parameter_format(&self, index: usize) -> FormatCode {
        match self.parameter_formats.len() {
            0 => FormatCode::Text,
            1 => self.parameter_formats[0],
            _ => self
                .parameter_formats
                .get(index)
                .copied()
                .unwrap_or_default(),
        }
    }
}

/// Describe ('D') message payload.
#[derive(Debug)]
pub struct DescribeMessage {
    pub target: TargetKind,
    pub name: String,
}

/// Execute ('E') message payload.
#[derive(Debug)]
pub struct ExecuteMessage {
    pub portal: String,
    /// Maximum number of rows to return; zero means no limit.
    pub max_rows: i32,
}

/// Close ('C') message payload.
#[derive(Debug)]
pub struct CloseMessage {
    pub target: TargetKind,
    pub name: String,
}

impl FrontendMessage {
    /// Parses a typed message body. `msg_type` is the leading type byte and
    /// `src` the payload that followed the length field.
    pub fn parse(msg_type: u8, mut src: BytesMut) -> Result<Self, ProtocolError> {
        match msg_type {
            b'Q' => Ok(FrontendMessage::Query(get_cstring(&mut src)?)),
            b'P' => {
                let name = get_cstring(&mut src)?;
                let query = get_cstring(&mut src)?;
                let count = get_i16(&mut src)?;
                let mut parameter_oids = Vec::with_capacity(count.max(0) as usize);
                for _ in 0..count {
                    parameter_oids.push(get_i32(&mut src)? as u32);
                }
                Ok(FrontendMessage::Parse(ParseMessage {
                    name,
                    query,
                    parameter_oids,
                }))
            }
            b'B' => {
                let portal = get_cstring(&mut src)?;
                let statement = get_cstring(&mut src)?;

                let format_count = get_i16(&mut src)?;
                let mut parameter_formats = Vec::with_capacity(format_count.max(0) as usize);
                for _ in 0..format_count {
                    let raw = get_i16(&mut src)?;
                    let format =
                        FormatCode::try_from(raw).map_err(|_| ProtocolError::InvalidMessage)?;
                    parameter_formats.push(format);
                }

                let parameter_count = get_i16(&mut src)?;
                let mut parameters = Vec::with_capacity(parameter_count.max(0) as usize);
                for _ in 0..parameter_count {
                    let length = get_i32(&mut src)?;
                    if length < 0 {
                        parameters.push(None);
                    } else {
                        let length = length as usize;
                        if src.len() < length {
                            return Err(ProtocolError::InvalidMessage);
                        }
                        parameters.push(Some(src.split_to(length).freeze()));
                    }
                }

                let result_count = get_i16(&mut src)?;
                let mut result_formats = Vec::with_capacity(result_count.max(0) as usize);
                for _ in 0..result_count {
                    let raw = get_i16(&mut src)?;
                    let format =
                        FormatCode::try_from(raw).map_err(|_| ProtocolError::InvalidMessage)?;
                    result_formats.push(format);
                }

                Ok(FrontendMessage::Bind(BindMessage {
                    portal,
                    statement,
                    parameter_formats,
                    parameters,
                    result_formats,
                }))
            }
            b'D' => {
                let target = get_target(&mut src)?;
                let name = get_cstring(&mut src)?;
                Ok(FrontendMessage::Describe(DescribeMessage { target, name }))
            }
            b'E' => {
                let portal = get_cstring(&mut src)?;
                let max_rows = get_i32(&mut src)?;
                Ok(FrontendMessage::Execute(ExecuteMessage { portal, max_rows }))
            }
            b'C' => {
                let target = get_target(&mut src)?;
                let name = get_cstring(&mut src)?;
                Ok(FrontendMessage::Close(CloseMessage { target, name }))
            }
            b'H' => Ok(FrontendMessage::Flush),
            b'S' => Ok(FrontendMessage::Sync),
            b'X' => Ok(FrontendMessage::Terminate),
            b'p' => Ok(FrontendMessage::Password(src.freeze())),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

impl Decoder for MessageCodec {
    type Item = FrontendMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((msg_type, body)) = split_typed_frame(src, self.max_message_size)? else {
            return Ok(None);
        };
        FrontendMessage::parse(msg_type, body).map(Some)
    }
}

fn get_i16(src: &mut BytesMut) -> Result<i16, ProtocolError> {
    if src.len() < 2 {
        return Err(ProtocolError::InvalidMessage);
    }
    Ok(src.get_i16())
}

fn get_i32(src: &mut BytesMut) -> Result<i32, ProtocolError> {
    if src.len() < 4 {
        return Err(ProtocolError::InvalidMessage);
    }
    Ok(src.get_i32())
}

fn get_target(src: &mut BytesMut) -> Result<TargetKind, ProtocolError> {
    if src.is_empty() {
        return Err(ProtocolError::InvalidMessage);
    }
    TargetKind::try_from(src.get_u8()).map_err(|_| ProtocolError::InvalidMessage)
}
