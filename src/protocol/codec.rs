use bytes::{Buf, BufMut, BytesMut};

use crate::protocol::ProtocolError;

/// Maximum message size in bytes (16 MB).
/// PostgreSQL accepts up to 1 GB; 16 MB is a reasonable default for a
/// callback-driven server and can be raised through the server options.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Smallest permitted maximum message size. Startup messages alone need a
/// few hundred bytes; anything below this cannot carry a real session.
pub const MIN_MESSAGE_BUFFER_SIZE: usize = 512;

/// Read a null-terminated string from a BytesMut buffer.
/// Returns the string (without the null terminator) if successful.
pub fn get_cstring(src: &mut BytesMut) -> Result<String, ProtocolError> {
    let Some(null_pos) = src.iter().position(|&b| b == 0) else {
        return Err(ProtocolError::InvalidMessage);
    };

    let bytes = src.split_to(null_pos);
    src.advance(1);
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Write a null-terminated string to a BytesMut buffer.
pub fn put_cstring(dst: &mut BytesMut, s: &str) {
    dst.put_slice(s.as_bytes());
    dst.put_u8(0);
}

/// Splits a typed message (`<type:u8><length:i32><payload>`) off the front of
/// the buffer. Returns `None` when the buffer does not yet hold a full
/// message. The length field includes itself but not the type byte.
pub(crate) fn split_typed_frame(
    src: &mut BytesMut,
    max_message_size: usize,
) -> Result<Option<(u8, BytesMut)>, ProtocolError> {
    if src.len() < 5 {
        return Ok(None);
    }

    let msg_type = src[0];
    let length = i32::from_be_bytes([src[1], src[2], src[3], src[4]]);
    if length < 4 {
        return Err(ProtocolError::InvalidLength(length));
    }

    let body_len = (length - 4) as usize;
    if body_len > max_message_size {
        return Err(ProtocolError::MessageTooLarge(body_len));
    }

    if src.len() < 5 + body_len {
        src.reserve(5 + body_len - src.len());
        return Ok(None);
    }

    src.advance(5);
    Ok(Some((msg_type, src.split_to(body_len))))
}

/// Splits an untyped startup-phase message (`<length:i32><payload>`) off the
/// front of the buffer. The length field includes itself.
pub(crate) fn split_startup_frame(
    src: &mut BytesMut,
    max_message_size: usize,
) -> Result<Option<BytesMut>, ProtocolError> {
    if src.len() < 4 {
        return Ok(None);
    }

    let length = i32::from_be_bytes([src[0], src[1], src[2], src[3]]);
    // Minimum length is 8 (length + protocol discriminator).
    if length < 8 {
        return Err(ProtocolError::InvalidLength(length));
    }

    let body_len = (length - 4) as usize;
    if body_len > max_message_size {
        return Err(ProtocolError::MessageTooLarge(body_len));
    }

    if src.len() < 4 + body_len {
        src.reserve(4 + body_len - src.len());
        return Ok(None);
    }

    src.advance(4);
    Ok(Some(src.split_to(body_len)))
}

/// Codec for the query phase of the PostgreSQL protocol.
/// Encodes BackendMessage (in backend.rs) and decodes FrontendMessage (in
/// frontend.rs).
pub struct MessageCodec {
    pub(crate) max_message_size: usize,
}

impl MessageCodec {
    /// Creates a new MessageCodec with the default maximum message size.
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Creates a new MessageCodec with the given maximum message size.
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Codec for the startup phase of the PostgreSQL protocol.
/// Decodes StartupMessage only (clients send no typed messages before the
/// handshake completes).
pub struct StartupCodec {
    pub(crate) max_message_size: usize,
}

impl StartupCodec {
    /// Creates a new StartupCodec with the default maximum message size.
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Creates a new StartupCodec with the given maximum message size.
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Transitions to the query phase codec after successful startup.
    pub fn ready(self) -> MessageCodec {
        MessageCodec {
            max_message_size: self.max_message_size,
        }
    }
}

impl Default for StartupCodec {
    fn default() -> Self {
        Self::new()
    }
}
