//! Server configuration surface.
//!
//! A [`Server`](crate::server::Server) is assembled with
//! [`Server::builder`](crate::server::Server::builder); every option is a
//! builder method and all validation happens in [`ServerBuilder::build`].
//! Query semantics come from two callback shapes: a `parse` handler that
//! turns SQL into an executable [`ParsedStatement`], or a `simple_query`
//! handler from which a parse handler is synthesised so extended-query
//! clients keep working.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::datum::{Oid, TypeRegistry};
use crate::protocol::{ErrorInfo, MIN_MESSAGE_BUFFER_SIZE};
use crate::server::auth::AuthStrategy;
use crate::server::state::{
    MemoryPortals, MemoryStatements, PortalStore, StatementStore,
};
use crate::server::Server;
use crate::sql;
use crate::writer::{Columns, DataWriter};

/// Handles one simple-query statement: receives the session context, the
/// SQL text, the result writer and the bound parameter values (always empty
/// in the simple-query protocol).
pub type SimpleQueryFn = Arc<
    dyn for<'a> Fn(
            &'a SessionContext,
            &'a str,
            &'a mut DataWriter,
            &'a [Option<String>],
        ) -> BoxFuture<'a, Result<(), ErrorInfo>>
        + Send
        + Sync,
>;

/// Executes a previously parsed statement with bound parameter values.
pub type StatementFn = Arc<
    dyn for<'a> Fn(
            &'a SessionContext,
            &'a mut DataWriter,
            &'a [Option<String>],
        ) -> BoxFuture<'a, Result<(), ErrorInfo>>
        + Send
        + Sync,
>;

/// Prepares a SQL string. The text has already been placeholder-normalised:
/// anonymous `?` markers arrive rewritten as `$N`.
pub type ParseFn = Arc<
    dyn for<'a> Fn(&'a SessionContext, &'a str) -> BoxFuture<'a, Result<ParsedStatement, ErrorInfo>>
        + Send
        + Sync,
>;

/// Per-session initialisation hook. Hooks chain: each receives the context
/// produced by the previous one and the final context is handed to every
/// query callback.
pub type SessionHookFn = Arc<
    dyn Fn(SessionContext) -> BoxFuture<'static, Result<SessionContext, ErrorInfo>> + Send + Sync,
>;

/// Connection teardown hook (session end or server-initiated drop).
/// Returned errors are logged, not reported to the peer.
pub type ConnHookFn = Arc<
    dyn for<'a> Fn(&'a SessionContext) -> BoxFuture<'a, Result<(), ErrorInfo>> + Send + Sync,
>;

/// Factory producing a fresh statement store per session.
pub type StatementStoreFactory = Arc<dyn Fn() -> Box<dyn StatementStore> + Send + Sync>;

/// Factory producing a fresh portal store per session.
pub type PortalStoreFactory = Arc<dyn Fn() -> Box<dyn PortalStore> + Send + Sync>;

/// Result of the parse callback.
pub struct ParsedStatement {
    /// Callback that executes the statement.
    pub handler: StatementFn,
    /// Inferred parameter type OIDs; zero entries mean "unknown".
    pub parameter_oids: Vec<Oid>,
    /// Result columns when the callback can describe them up front; `None`
    /// answers `Describe` with `NoData`.
    pub columns: Option<Columns>,
}

impl ParsedStatement {
    /// Creates a statement with the given handler and no inferred metadata.
    pub fn new(handler: StatementFn) -> Self {
        Self {
            handler,
            parameter_oids: Vec::new(),
            columns: None,
        }
    }

    /// Sets the inferred parameter OIDs.
    pub fn parameters(mut self, parameter_oids: Vec<Oid>) -> Self {
        self.parameter_oids = parameter_oids;
        self
    }

    /// Declares the result columns for `Describe`.
    pub fn columns(mut self, columns: Columns) -> Self {
        self.columns = Some(columns);
        self
    }
}

/// Typed storage for consumer session state, populated by session hooks.
#[derive(Default)]
pub struct Extensions {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Stores a value, replacing any previous value of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.entries
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast().ok())
            .map(|boxed| *boxed)
    }

    /// Returns a reference to the stored value of this type.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref())
    }

    /// Returns a mutable reference to the stored value of this type.
    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.entries
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut())
    }

    /// Removes and returns the stored value of this type.
    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.entries
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast().ok())
            .map(|boxed| *boxed)
    }
}

/// Per-session context handed to every callback.
pub struct SessionContext {
    /// Authenticated user name from the startup message.
    pub user: String,
    /// Requested database, when the client sent one.
    pub database: Option<String>,
    /// Every startup parameter as sent by the client.
    pub parameters: HashMap<String, String>,
    /// Backend process id announced in `BackendKeyData`.
    pub process_id: i32,
    /// Cancellation secret announced in `BackendKeyData`.
    pub secret_key: i32,
    pub(crate) cancellation: CancellationToken,
    extensions: Extensions,
}

impl SessionContext {
    pub(crate) fn new(
        user: String,
        database: Option<String>,
        parameters: HashMap<String, String>,
        process_id: i32,
        secret_key: i32,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            user,
            database,
            parameters,
            process_id,
            secret_key,
            cancellation,
            extensions: Extensions::default(),
        }
    }

    /// Token fired when a `CancelRequest` targets the running query.
    /// Long-running callbacks should return once it trips.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Consumer state installed by session hooks.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable access to the consumer state.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

/// Server construction failures.
#[derive(Debug, PartialEq, Eq)]
pub enum OptionError {
    /// Neither `parse` nor `simple_query` was supplied.
    MissingQueryHandler,
    /// Both `parse` and `simple_query` were supplied.
    ConflictingQueryHandlers,
    /// `message_buffer_size` is below the minimum.
    MessageBufferTooSmall(usize),
}

impl std::fmt::Display for OptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionError::MissingQueryHandler => {
                write!(f, "a parse or simple_query handler is required")
            }
            OptionError::ConflictingQueryHandlers => {
                write!(f, "parse and simple_query handlers are mutually exclusive")
            }
            OptionError::MessageBufferTooSmall(n) => write!(
                f,
                "message buffer of {} bytes is below the minimum of {}",
                n, MIN_MESSAGE_BUFFER_SIZE
            ),
        }
    }
}

impl std::error::Error for OptionError {}

/// Builder for a [`Server`].
pub struct ServerBuilder {
    parse: Option<ParseFn>,
    simple_query: Option<SimpleQueryFn>,
    session_hooks: Vec<SessionHookFn>,
    on_close: Option<ConnHookFn>,
    on_terminate: Option<ConnHookFn>,
    logger: Option<tracing::Dispatch>,
    version: String,
    auth: AuthStrategy,
    tls: Option<Arc<rustls::ServerConfig>>,
    max_message_size: usize,
    statements: StatementStoreFactory,
    portals: PortalStoreFactory,
    parameters: Vec<(String, String)>,
    startup_timeout: Option<Duration>,
    types: Arc<TypeRegistry>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            parse: None,
            simple_query: None,
            session_hooks: Vec::new(),
            on_close: None,
            on_terminate: None,
            logger: None,
            version: "16.0".to_string(),
            auth: AuthStrategy::Trust,
            tls: None,
            max_message_size: crate::protocol::DEFAULT_MAX_MESSAGE_SIZE,
            statements: Arc::new(|| Box::new(MemoryStatements::new())),
            portals: Arc::new(|| Box::new(MemoryPortals::new())),
            parameters: Vec::new(),
            startup_timeout: None,
            types: Arc::new(TypeRegistry::new()),
        }
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies the parse handler for prepared statements. Mutually
    /// exclusive with [`ServerBuilder::simple_query`].
    pub fn parse(mut self, parse: ParseFn) -> Self {
        self.parse = Some(parse);
        self
    }

    /// Supplies a simple-query handler. A parse handler is synthesised from
    /// it so extended-query clients work too: parameter OIDs are derived by
    /// counting `$N`/`?` placeholders. Mutually exclusive with
    /// [`ServerBuilder::parse`].
    pub fn simple_query(mut self, handler: SimpleQueryFn) -> Self {
        self.simple_query = Some(handler);
        self
    }

    /// Adds a session hook. May be called multiple times; hooks chain in
    /// registration order, each receiving the context produced by the
    /// previous one.
    pub fn session(mut self, hook: SessionHookFn) -> Self {
        self.session_hooks.push(hook);
        self
    }

    /// Registers a hook invoked when a session ends.
    pub fn on_close(mut self, hook: ConnHookFn) -> Self {
        self.on_close = Some(hook);
        self
    }

    /// Registers a hook invoked when the server drops a session during
    /// shutdown.
    pub fn on_terminate(mut self, hook: ConnHookFn) -> Self {
        self.on_terminate = Some(hook);
        self
    }

    /// Scopes all connection logging to the given `tracing` dispatcher
    /// instead of the global default.
    pub fn logger(mut self, dispatch: tracing::Dispatch) -> Self {
        self.logger = Some(dispatch);
        self
    }

    /// Overrides the advertised `server_version` parameter.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Selects the client authentication strategy (default: trust).
    pub fn client_auth(mut self, auth: AuthStrategy) -> Self {
        self.auth = auth;
        self
    }

    /// Enables TLS upgrades with the given certificate configuration.
    pub fn certificates(mut self, config: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    /// Caps the inbound message size. Values below 512 bytes are rejected
    /// at build time.
    pub fn message_buffer_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Swaps the per-session statement store implementation.
    pub fn statements(mut self, factory: StatementStoreFactory) -> Self {
        self.statements = factory;
        self
    }

    /// Swaps the per-session portal store implementation.
    pub fn portals(mut self, factory: PortalStoreFactory) -> Self {
        self.portals = factory;
        self
    }

    /// Advertises an additional `ParameterStatus` entry after
    /// authentication.
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    /// Applies a read deadline to the initial startup exchange.
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }

    /// Replaces the value codec registry.
    pub fn types(mut self, registry: TypeRegistry) -> Self {
        self.types = Arc::new(registry);
        self
    }

    /// Validates the configuration and produces a [`Server`].
    pub fn build(self) -> Result<Server, OptionError> {
        if self.max_message_size < MIN_MESSAGE_BUFFER_SIZE {
            return Err(OptionError::MessageBufferTooSmall(self.max_message_size));
        }

        let parse = match (self.parse, self.simple_query) {
            (Some(_), Some(_)) => return Err(OptionError::ConflictingQueryHandlers),
            (None, None) => return Err(OptionError::MissingQueryHandler),
            (Some(parse), None) => parse,
            (None, Some(simple)) => synthesize_parse(simple),
        };

        Ok(Server::new(ServerConfig {
            parse,
            session_hooks: self.session_hooks,
            on_close: self.on_close,
            on_terminate: self.on_terminate,
            logger: self.logger,
            version: self.version,
            auth: self.auth,
            tls: self.tls.map(tokio_rustls::TlsAcceptor::from),
            max_message_size: self.max_message_size,
            statements: self.statements,
            portals: self.portals,
            parameters: self.parameters,
            startup_timeout: self.startup_timeout,
            types: self.types,
        }))
    }
}

/// Wraps a simple-query handler in the parse-handler shape: the statement
/// callback re-invokes the handler with the original SQL, and parameter
/// OIDs are all zero ("unknown"), one per placeholder.
fn synthesize_parse(simple: SimpleQueryFn) -> ParseFn {
    Arc::new(move |_ctx, query: &str| {
        let simple = simple.clone();
        let query = query.to_string();
        let (_, placeholders) = sql::normalize_placeholders(&query);
        Box::pin(async move {
            let handler: StatementFn = Arc::new(move |ctx, writer, parameters| {
                let simple = simple.clone();
                let query = query.clone();
                Box::pin(async move { simple(ctx, &query, writer, parameters).await })
            });
            Ok(ParsedStatement::new(handler).parameters(vec![0; placeholders]))
        })
    })
}

/// Fully validated server configuration.
pub(crate) struct ServerConfig {
    pub(crate) parse: ParseFn,
    pub(crate) session_hooks: Vec<SessionHookFn>,
    pub(crate) on_close: Option<ConnHookFn>,
    pub(crate) on_terminate: Option<ConnHookFn>,
    pub(crate) logger: Option<tracing::Dispatch>,
    pub(crate) version: String,
    pub(crate) auth: AuthStrategy,
    pub(crate) tls: Option<tokio_rustls::TlsAcceptor>,
    pub(crate) max_message_size: usize,
    pub(crate) statements: StatementStoreFactory,
    pub(crate) portals: PortalStoreFactory,
    pub(crate) parameters: Vec<(String, String)>,
    pub(crate) startup_timeout: Option<Duration>,
    pub(crate) types: Arc<TypeRegistry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;

    fn noop_simple_query() -> SimpleQueryFn {
        Arc::new(|_, _, writer, _| {
            Box::pin(async move {
                writer.complete("OK").map_err(|e| ErrorInfo::new(e.to_string()))
            })
        })
    }

    fn noop_parse() -> ParseFn {
        Arc::new(|_, _| {
            Box::pin(async {
                Ok(ParsedStatement::new(Arc::new(|_, _, _| {
                    Box::pin(async { Ok(()) })
                })))
            })
        })
    }

    #[test]
    fn test_requires_query_handler() {
        assert_eq!(
            Server::builder().build().err(),
            Some(OptionError::MissingQueryHandler)
        );
    }

    #[test]
    fn test_rejects_both_query_handlers() {
        let result = Server::builder()
            .parse(noop_parse())
            .simple_query(noop_simple_query())
            .build();
        assert_eq!(result.err(), Some(OptionError::ConflictingQueryHandlers));
    }

    #[test]
    fn test_rejects_small_message_buffer() {
        let result = Server::builder()
            .simple_query(noop_simple_query())
            .message_buffer_size(128)
            .build();
        assert_eq!(result.err(), Some(OptionError::MessageBufferTooSmall(128)));
    }

    #[tokio::test]
    async fn test_synthesized_parse_counts_placeholders() {
        let parse = synthesize_parse(noop_simple_query());
        let ctx = SessionContext::new(
            "alice".to_string(),
            None,
            HashMap::new(),
            1,
            2,
            CancellationToken::new(),
        );

        for query in [
            "SELECT * FROM users WHERE id = $1 AND age > $2",
            "SELECT * FROM users WHERE id = ? AND age > ?",
        ] {
            let stmt = parse(&ctx, query).await.unwrap();
            assert_eq!(stmt.parameter_oids, vec![0, 0], "query: {}", query);
        }
    }

    #[tokio::test]
    async fn test_session_hooks_chain() {
        #[derive(PartialEq, Debug)]
        struct SessionId(String);

        let hooks: Vec<SessionHookFn> = vec![
            Arc::new(|ctx| Box::pin(async { Ok(ctx) })),
            Arc::new(|mut ctx| {
                Box::pin(async move {
                    ctx.extensions_mut()
                        .insert(SessionId("Super Secret Session ID".to_string()));
                    Ok(ctx)
                })
            }),
        ];

        let mut ctx = SessionContext::new(
            "alice".to_string(),
            None,
            HashMap::new(),
            1,
            2,
            CancellationToken::new(),
        );
        for hook in &hooks {
            ctx = hook(ctx).await.unwrap();
        }

        assert_eq!(
            ctx.extensions().get::<SessionId>(),
            Some(&SessionId("Super Secret Session ID".to_string()))
        );
    }

    #[test]
    fn test_extensions_typed_access() {
        let mut extensions = Extensions::default();
        assert!(extensions.insert(41i32).is_none());
        assert_eq!(extensions.insert(42i32), Some(41));
        assert_eq!(extensions.get::<i32>(), Some(&42));

        *extensions.get_mut::<i32>().unwrap() += 1;
        assert_eq!(extensions.remove::<i32>(), Some(43));
        assert!(extensions.get::<i32>().is_none());
    }
}
