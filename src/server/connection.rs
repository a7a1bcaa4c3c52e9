//! Per-connection session state machine.
//!
//! After the handshake hands over an authenticated stream, the connection
//! loop dispatches one inbound message at a time: the simple-query protocol
//! (`Q`) and the extended-query pipeline (`P`/`B`/`D`/`E`/`C`/`H`/`S`).
//! Responses are buffered on the framed sink and flushed at `Flush`,
//! `Sync`, and at the end of every simple-query response.
//!
//! Failure discipline: a command error inside an extended-query sequence
//! latches the session; every following message except `Sync` and
//! `Terminate` is discarded, and `Sync` clears the latch with a final
//! `ReadyForQuery`. Simple-query errors report immediately and keep the
//! session usable.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;
use crate::options::{ServerConfig, SessionContext, StatementFn};
use crate::protocol::{
    sql_state, BackendMessage, BindMessage, CloseMessage, DescribeMessage, ErrorInfo,
    ExecuteMessage, FrontendMessage, MessageCodec, ParseMessage, ProtocolError, TargetKind,
    TransactionStatus,
};
use crate::server::handshake::MaybeTlsStream;
use crate::server::registry::Registry;
use crate::server::state::{PortalStore, PreparedStatement, StatementStore, Portal};
use crate::sql;
use crate::writer::{apply_result_formats, row_description, DataWriter};

/// Outcome of one user callback run.
enum CallbackOutcome {
    Ok,
    Cancelled,
    Failed(ErrorInfo),
}

pub(crate) struct Connection {
    framed: Framed<MaybeTlsStream, MessageCodec>,
    ctx: SessionContext,
    config: Arc<ServerConfig>,
    registry: Arc<Registry>,
    statements: Box<dyn StatementStore>,
    portals: Box<dyn PortalStore>,
    /// Extended-query error latch; cleared by Sync.
    failed: bool,
}

impl Connection {
    pub(crate) fn new(
        framed: Framed<MaybeTlsStream, MessageCodec>,
        ctx: SessionContext,
        config: Arc<ServerConfig>,
        registry: Arc<Registry>,
    ) -> Self {
        let statements = (config.statements)();
        let portals = (config.portals)();
        Self {
            framed,
            ctx,
            config,
            registry,
            statements,
            portals,
            failed: false,
        }
    }

    /// Runs the session until the peer terminates, the stream closes, or
    /// the server shuts down.
    pub(crate) async fn run(mut self, shutdown: CancellationToken) -> Result<(), Error> {
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    self.teardown(true).await;
                    return Ok(());
                }
                next = self.framed.next() => next,
            };

            let Some(next) = next else {
                // EOF without Terminate; treated the same way.
                self.teardown(false).await;
                return Ok(());
            };

            let message = match next {
                Ok(message) => message,
                Err(e) => {
                    let error = Error::from(e);
                    self.report_fatal(&error).await;
                    self.teardown(false).await;
                    return Err(error);
                }
            };

            if self.failed
                && !matches!(message, FrontendMessage::Sync | FrontendMessage::Terminate)
            {
                continue;
            }

            let result = match message {
                FrontendMessage::Query(query) => self.handle_query(&query).await,
                FrontendMessage::Parse(parse) => self.handle_parse(parse).await,
                FrontendMessage::Bind(bind) => self.handle_bind(bind).await,
                FrontendMessage::Describe(describe) => self.handle_describe(describe).await,
                FrontendMessage::Execute(execute) => self.handle_execute(execute).await,
                FrontendMessage::Close(close) => self.handle_close(close).await,
                FrontendMessage::Flush => self.framed.flush().await.map_err(Error::from),
                FrontendMessage::Sync => self.handle_sync().await,
                FrontendMessage::Terminate => {
                    self.teardown(false).await;
                    return Ok(());
                }
                FrontendMessage::Password(_) => Err(Error::Protocol(
                    ProtocolError::OutOfOrderMessage("password message outside authentication"),
                )),
            };

            if let Err(error) = result {
                if error.is_fatal() {
                    self.report_fatal(&error).await;
                    self.teardown(false).await;
                    return Err(error);
                }
                // Recoverable: report and latch until Sync.
                if self.framed.feed(error.to_error_info().into()).await.is_err() {
                    self.teardown(false).await;
                    return Err(error);
                }
                self.failed = true;
            }
        }
    }

    /// Simple-query protocol: split, run the handler per statement, always
    /// finish with ReadyForQuery.
    async fn handle_query(&mut self, query: &str) -> Result<(), Error> {
        debug!(query, "simple query");
        let statements = sql::split_statements(query);

        if statements.is_empty() {
            self.framed.feed(BackendMessage::EmptyQueryResponse).await?;
            return self.ready_for_query().await;
        }

        for statement in statements {
            // The parse callback always sees placeholder-normalised text,
            // whichever protocol carried the query.
            let (statement, _) = sql::normalize_placeholders(statement);
            let parsed = match (self.config.parse)(&self.ctx, &statement).await {
                Ok(parsed) => parsed,
                Err(info) => {
                    self.framed.feed(info.into()).await?;
                    break;
                }
            };

            let no_parameters: Vec<Option<String>> = Vec::new();
            let (outcome, wrote_frames, rows, completed) = self
                .run_statement(parsed.handler, &no_parameters, 0)
                .await?;

            match outcome {
                CallbackOutcome::Ok => {
                    if !completed {
                        // The callback owns completion; never leave the
                        // client without one.
                        if wrote_frames {
                            self.framed
                                .feed(BackendMessage::CommandComplete {
                                    tag: format!("SELECT {}", rows),
                                })
                                .await?;
                        } else {
                            self.framed.feed(BackendMessage::EmptyQueryResponse).await?;
                        }
                    }
                }
                CallbackOutcome::Cancelled => {
                    self.framed
                        .feed(Error::Cancelled.to_error_info().into())
                        .await?;
                    break;
                }
                CallbackOutcome::Failed(info) => {
                    self.framed.feed(info.into()).await?;
                    break;
                }
            }
        }

        self.ready_for_query().await
    }

    /// Extended-query Parse: normalise placeholders, delegate to the parse
    /// callback, merge declared parameter types, cache the statement.
    async fn handle_parse(&mut self, message: ParseMessage) -> Result<(), Error> {
        debug!(name = %message.name, query = %message.query, "parse");
        let (normalized, _) = sql::normalize_placeholders(&message.query);

        let parsed = (self.config.parse)(&self.ctx, &normalized)
            .await
            .map_err(Error::Callback)?;

        // Client-declared OIDs win; zero positions fall back to what the
        // callback inferred.
        let inferred = parsed.parameter_oids;
        let count = message.parameter_oids.len().max(inferred.len());
        let mut parameter_oids = Vec::with_capacity(count);
        for index in 0..count {
            let declared = message.parameter_oids.get(index).copied().unwrap_or(0);
            if declared != 0 {
                parameter_oids.push(declared);
            } else {
                parameter_oids.push(inferred.get(index).copied().unwrap_or(0));
            }
        }

        if message.name.is_empty() {
            // Replacing the unnamed statement invalidates portals bound to
            // the previous one.
            self.portals.remove_for_statement("");
        }

        let statement = Arc::new(PreparedStatement {
            name: message.name,
            query: normalized,
            parameter_oids,
            handler: parsed.handler,
            columns: parsed.columns,
        });

        self.statements.put(statement).map_err(|e| {
            Error::Callback(ErrorInfo::with_code(
                sql_state::DUPLICATE_PREPARED_STATEMENT,
                e.to_string(),
            ))
        })?;

        self.framed.feed(BackendMessage::ParseComplete).await?;
        Ok(())
    }

    /// Extended-query Bind: validate against the statement, cache a portal.
    async fn handle_bind(&mut self, message: BindMessage) -> Result<(), Error> {
        debug!(portal = %message.portal, statement = %message.statement, "bind");
        let statement = self.statements.get(&message.statement).ok_or_else(|| {
            Error::Callback(ErrorInfo::with_code(
                sql_state::INVALID_SQL_STATEMENT_NAME,
                format!(
                    "prepared statement \"{}\" does not exist",
                    message.statement
                ),
            ))
        })?;

        if message.parameters.len() != statement.parameter_oids.len() {
            return Err(Error::Callback(ErrorInfo::with_code(
                sql_state::PROTOCOL_VIOLATION,
                format!(
                    "bind message supplies {} parameters, but prepared statement \"{}\" requires {}",
                    message.parameters.len(),
                    statement.name,
                    statement.parameter_oids.len()
                ),
            )));
        }

        // Parameters reach callbacks as text regardless of the advertised
        // format code; binary payloads are passed through where they form
        // valid UTF-8.
        let parameters: Vec<Option<String>> = message
            .parameters
            .iter()
            .map(|value| {
                value
                    .as_ref()
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            })
            .collect();

        self.portals.put(Portal {
            name: message.portal,
            statement,
            parameters,
            result_formats: message.result_formats,
        });

        self.framed.feed(BackendMessage::BindComplete).await?;
        Ok(())
    }

    /// Extended-query Describe for a statement or portal.
    async fn handle_describe(&mut self, message: DescribeMessage) -> Result<(), Error> {
        match message.target {
            TargetKind::Statement => {
                let statement = self.statements.get(&message.name).ok_or_else(|| {
                    Error::Callback(ErrorInfo::with_code(
                        sql_state::INVALID_SQL_STATEMENT_NAME,
                        format!("prepared statement \"{}\" does not exist", message.name),
                    ))
                })?;

                self.framed
                    .feed(BackendMessage::ParameterDescription {
                        param_types: statement.parameter_oids.clone(),
                    })
                    .await?;

                match &statement.columns {
                    Some(columns) => self.framed.feed(row_description(columns)).await?,
                    None => self.framed.feed(BackendMessage::NoData).await?,
                }
            }
            TargetKind::Portal => {
                let portal = self.portals.get(&message.name).ok_or_else(|| {
                    Error::Callback(ErrorInfo::with_code(
                        sql_state::INVALID_CURSOR_NAME,
                        format!("portal \"{}\" does not exist", message.name),
                    ))
                })?;

                let described = portal
                    .statement
                    .columns
                    .as_ref()
                    .map(|columns| apply_result_formats(columns, &portal.result_formats));
                match described {
                    Some(columns) => self.framed.feed(row_description(&columns)).await?,
                    None => self.framed.feed(BackendMessage::NoData).await?,
                }
            }
        }
        Ok(())
    }

    /// Extended-query Execute: run the portal's statement callback.
    async fn handle_execute(&mut self, message: ExecuteMessage) -> Result<(), Error> {
        debug!(portal = %message.portal, max_rows = message.max_rows, "execute");
        let portal = self.portals.get(&message.portal).ok_or_else(|| {
            Error::Callback(ErrorInfo::with_code(
                sql_state::INVALID_CURSOR_NAME,
                format!("portal \"{}\" does not exist", message.portal),
            ))
        })?;

        let handler = portal.statement.handler.clone();
        let parameters = portal.parameters.clone();
        let max_rows = message.max_rows.max(0) as u64;

        let (outcome, wrote_frames, rows, completed) = self
            .run_statement(handler, &parameters, max_rows)
            .await?;

        match outcome {
            CallbackOutcome::Ok => {
                // Suspension wins only when the callback did not conclude
                // the result stream itself.
                if !completed {
                    if max_rows > 0 && rows >= max_rows {
                        self.framed.feed(BackendMessage::PortalSuspended).await?;
                    } else if wrote_frames {
                        self.framed
                            .feed(BackendMessage::CommandComplete {
                                tag: format!("SELECT {}", rows),
                            })
                            .await?;
                    } else {
                        self.framed.feed(BackendMessage::EmptyQueryResponse).await?;
                    }
                }
                Ok(())
            }
            CallbackOutcome::Cancelled => Err(Error::Cancelled),
            CallbackOutcome::Failed(info) => Err(Error::Callback(info)),
        }
    }

    /// Extended-query Close: drop a statement or portal; absent entries
    /// are a no-op.
    async fn handle_close(&mut self, message: CloseMessage) -> Result<(), Error> {
        match message.target {
            TargetKind::Statement => {
                self.statements.remove(&message.name);
                self.portals.remove_for_statement(&message.name);
            }
            TargetKind::Portal => {
                self.portals.remove(&message.name);
            }
        }
        self.framed.feed(BackendMessage::CloseComplete).await?;
        Ok(())
    }

    /// Sync: clear the error latch, drop the unnamed portal (its implicit
    /// transaction is over), answer ReadyForQuery.
    async fn handle_sync(&mut self) -> Result<(), Error> {
        self.failed = false;
        self.portals.remove("");
        self.ready_for_query().await
    }

    /// Runs one statement callback with cooperative cancellation, appending
    /// everything the callback wrote to the outbound buffer. Returns the
    /// outcome plus whether frames were written, the row count, and whether
    /// the callback completed the stream.
    async fn run_statement(
        &mut self,
        handler: StatementFn,
        parameters: &[Option<String>],
        max_rows: u64,
    ) -> Result<(CallbackOutcome, bool, u64, bool), Error> {
        let mut writer = DataWriter::new(self.config.types.clone(), max_rows);
        let cancellation = self.ctx.cancellation.clone();

        let outcome = tokio::select! {
            _ = cancellation.cancelled() => CallbackOutcome::Cancelled,
            result = handler(&self.ctx, &mut writer, parameters) => match result {
                Ok(()) => CallbackOutcome::Ok,
                Err(info) => CallbackOutcome::Failed(info),
            },
        };

        if matches!(outcome, CallbackOutcome::Cancelled) {
            // The fired token is spent; arm a fresh one for later queries.
            self.ctx.cancellation = self.registry.refresh(self.ctx.process_id);
        }

        let wrote_frames = writer.has_output();
        let rows = writer.written();
        let completed = writer.completed();
        let frames = writer.take();
        if !frames.is_empty() {
            self.framed.write_buffer_mut().unsplit(frames);
        }

        Ok((outcome, wrote_frames, rows, completed))
    }

    /// Emits ReadyForQuery and flushes. The transaction status is always
    /// 'I': this server does not execute SQL and tracks no transactions.
    async fn ready_for_query(&mut self) -> Result<(), Error> {
        self.framed
            .feed(BackendMessage::ReadyForQuery {
                status: TransactionStatus::Idle,
            })
            .await?;
        self.framed.flush().await?;
        Ok(())
    }

    /// Best-effort error report before closing on a fatal failure.
    async fn report_fatal(&mut self, error: &Error) {
        let _ = self.framed.send(error.to_error_info().into()).await;
    }

    /// Releases session state and runs the teardown hook.
    async fn teardown(&mut self, server_initiated: bool) {
        let hook = if server_initiated {
            &self.config.on_terminate
        } else {
            &self.config.on_close
        };
        if let Some(hook) = hook {
            if let Err(info) = hook(&self.ctx).await {
                warn!(error = %info, "connection teardown hook failed");
            }
        }

        self.statements.clear();
        self.portals.clear();
        let _ = self.framed.flush().await;
    }
}
