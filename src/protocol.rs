//! PostgreSQL wire protocol message model and framing.
//!
//! This module implements the byte-level layer of the PostgreSQL v3.0
//! protocol: typed length-prefixed frames, the startup-phase messages that
//! omit the type byte, and the full backend/frontend message vocabulary the
//! server needs.
//!
//! ```text
//! +----------+                           +----------+
//! |  Client  |  --- FrontendMessage -->  |  Server  |
//! |  (psql)  |  <-- BackendMessage  ---  | (pgfront)|
//! +----------+                           +----------+
//!               ^                   ^
//!               |    MessageCodec   |
//!               +-------------------+
//! ```
//!
//! The connection starts framed with [`StartupCodec`] (untyped startup
//! messages only) and transitions to [`MessageCodec`] once the handshake
//! settles, via [`StartupCodec::ready`].

pub mod backend;
pub mod codec;
pub mod error;
pub mod frontend;
pub mod types;

pub use backend::{
    sql_state, BackendMessage, DataValue, ErrorField, ErrorInfo, FieldDescription,
    TransactionStatus,
};
pub use codec::{MessageCodec, StartupCodec, DEFAULT_MAX_MESSAGE_SIZE, MIN_MESSAGE_BUFFER_SIZE};
pub use error::ProtocolError;
pub use frontend::{
    BindMessage, CloseMessage, DescribeMessage, ExecuteMessage, FrontendMessage, ParseMessage,
    StartupMessage, StartupParameters,
};
pub use types::{ErrorFieldCode, FormatCode, TargetKind};
