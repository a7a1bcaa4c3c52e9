//! pgfront is a server-side implementation of the PostgreSQL wire protocol
//! (v3). It lets any process expose an endpoint that standard PostgreSQL
//! clients can connect to, authenticate against, and query — without a
//! PostgreSQL database behind it. SQL interpretation is delegated entirely
//! to caller-supplied callbacks; the crate handles protocol framing,
//! authentication, session state, the extended-query lifecycle, and error
//! reporting.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pgfront::{Column, Server, SimpleQueryFn};
//! use pgfront::datum::oid;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handler: SimpleQueryFn = Arc::new(|_ctx, _query, writer, _params| {
//!         Box::pin(async move {
//!             writer.define(vec![Column::text("answer", oid::INT4)])?;
//!             writer.row(vec![42.into()])?;
//!             writer.complete("SELECT 1")?;
//!             Ok(())
//!         })
//!     });
//!
//!     let server = Arc::new(Server::builder().simple_query(handler).build()?);
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:5432").await?;
//!     server.serve(listener).await?;
//!     Ok(())
//! }
//! ```

pub mod datum;
pub mod error;
pub mod options;
pub mod protocol;
pub mod server;
pub mod sql;
pub mod writer;

pub use datum::{TypeCodec, TypeRegistry, Value};
pub use error::Error;
pub use options::{
    Extensions, OptionError, ParseFn, ParsedStatement, PortalStoreFactory, ServerBuilder,
    SessionContext, SessionHookFn, SimpleQueryFn, StatementFn, StatementStoreFactory,
};
pub use protocol::{ErrorInfo, FormatCode};
pub use server::auth::{AuthStrategy, ScramSecret};
pub use server::state::{PortalStore, PreparedStatement, StatementStore};
pub use server::Server;
pub use writer::{Column, Columns, DataWriter};
