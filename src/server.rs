//! TCP server speaking the PostgreSQL wire protocol.
//!
//! [`Server::serve`] accepts connections and spawns one session task per
//! client: handshake, authentication, then the query loop. The only state
//! shared between sessions is the cancel-request [`registry`]. Shutdown is
//! cooperative: [`Server::close`] stops the accept loop, signals every
//! session, and waits for them to drain within a grace period.

pub mod auth;
pub(crate) mod connection;
pub(crate) mod handshake;
pub(crate) mod registry;
pub mod state;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument::WithSubscriber, warn, Instrument};

use crate::options::{ServerBuilder, ServerConfig, SessionContext};
use crate::server::connection::Connection;
use crate::server::handshake::HandshakeOutcome;
use crate::server::registry::Registry;

/// How long [`Server::close`] waits for active sessions to drain.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// A configured wire-protocol server.
///
/// Built once via [`Server::builder`] and immutable afterwards; wrap it in
/// an [`Arc`] to serve and close from different tasks.
pub struct Server {
    config: Arc<ServerConfig>,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    next_pid: AtomicI32,
}

impl Server {
    /// Starts assembling a server configuration.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub(crate) fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(Registry::new()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            next_pid: AtomicI32::new(1),
        }
    }

    /// Accepts connections on the listener until [`Server::close`] is
    /// invoked, spawning one session task per connection.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = ?listener.local_addr().ok(), "serving");

        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted?,
            };

            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            let secret_key: i32 = rand::random();
            let config = self.config.clone();
            let registry = self.registry.clone();
            let shutdown = self.shutdown.clone();

            debug!(pid, %peer, "accepted connection");

            let session = handle_connection(config, registry, shutdown, stream, pid, secret_key)
                .instrument(tracing::info_span!("session", pid, %peer));

            match &self.config.logger {
                Some(dispatch) => {
                    self.tracker.spawn(session.with_subscriber(dispatch.clone()));
                }
                None => {
                    self.tracker.spawn(session);
                }
            }
        }

        Ok(())
    }

    /// Stops accepting connections, signals active sessions to terminate,
    /// and waits for them to drain (bounded by a grace period). Idempotent.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        if tokio::time::timeout(CLOSE_GRACE, self.tracker.wait())
            .await
            .is_err()
        {
            warn!("sessions did not drain within the close grace period");
        }
    }
}

/// Runs one accepted connection from handshake to teardown.
async fn handle_connection(
    config: Arc<ServerConfig>,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
    stream: TcpStream,
    pid: i32,
    secret_key: i32,
) {
    match handshake::negotiate(&config, stream, pid, secret_key).await {
        Ok(HandshakeOutcome::Ready {
            mut framed,
            parameters,
        }) => {
            let token = registry.register(pid, secret_key);
            let mut ctx = SessionContext::new(
                parameters.user,
                parameters.database,
                parameters.all,
                pid,
                secret_key,
                token,
            );

            // Session hooks chain: each receives the context produced by
            // the previous one.
            for hook in &config.session_hooks {
                match hook(ctx).await {
                    Ok(next) => ctx = next,
                    Err(info) => {
                        warn!(error = %info, "session hook rejected connection");
                        let _ = framed.send(info.into()).await;
                        registry.unregister(pid);
                        return;
                    }
                }
            }

            let connection = Connection::new(framed, ctx, config, registry.clone());
            if let Err(error) = connection.run(shutdown).await {
                warn!(error = %error, "session ended with error");
            } else {
                debug!("session closed");
            }
            registry.unregister(pid);
        }
        Ok(HandshakeOutcome::Cancel {
            pid: target_pid,
            secret_key,
        }) => {
            let delivered = registry.cancel(target_pid, secret_key);
            debug!(target_pid, delivered, "cancel request");
        }
        Ok(HandshakeOutcome::Rejected) => {
            debug!("handshake rejected");
        }
        Err(error) => {
            warn!(error = %error, "handshake failed");
        }
    }
}
