//! Connection startup: TLS negotiation, authentication, session announce.
//!
//! The handshake owns the connection from accept until the first
//! `ReadyForQuery`. It runs a strictly linear state machine: startup-phase
//! requests (TLS / GSSENC / cancel / startup) are dispatched on their
//! discriminator, the configured [`AuthStrategy`] exchange runs, and the
//! server parameter burst plus `BackendKeyData` complete the phase.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::error::Error;
use crate::options::ServerConfig;
use crate::protocol::{
    sql_state, BackendMessage, ErrorInfo, FrontendMessage, MessageCodec, ProtocolError,
    StartupCodec, StartupMessage, StartupParameters, TransactionStatus,
};
use crate::server::auth::{AuthStrategy, ScramExchange, ScramSecretFn};

/// A connection stream, optionally upgraded to TLS.
pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

type StartupFramed = Framed<MaybeTlsStream, StartupCodec>;
type MessageFramed = Framed<MaybeTlsStream, MessageCodec>;

/// Result of a completed handshake.
pub(crate) enum HandshakeOutcome {
    /// The client authenticated; the connection enters the query phase.
    Ready {
        framed: MessageFramed,
        parameters: StartupParameters,
    },
    /// The connection carried a cancel request for another session.
    Cancel { pid: i32, secret_key: i32 },
    /// The handshake was refused (bad auth, bad startup); the error has
    /// already been written and the connection should be dropped.
    Rejected,
}

/// Runs the startup state machine to completion.
pub(crate) async fn negotiate(
    config: &ServerConfig,
    stream: TcpStream,
    pid: i32,
    secret_key: i32,
) -> Result<HandshakeOutcome, Error> {
    let mut framed = Framed::new(
        MaybeTlsStream::Plain(stream),
        StartupCodec::with_max_message_size(config.max_message_size),
    );
    let mut tls_active = false;

    loop {
        let message = match read_startup(config, &mut framed).await {
            Ok(message) => message,
            Err(error) => {
                // Malformed startup traffic is answered before closing.
                if matches!(error, Error::Protocol(_)) {
                    let mut buf = bytes::BytesMut::new();
                    BackendMessage::from(error.to_error_info()).encode(&mut buf);
                    let _ = framed.get_mut().write_all(&buf).await;
                    let _ = framed.get_mut().flush().await;
                }
                return Err(error);
            }
        };

        match message {
            StartupMessage::SslRequest => {
                if tls_active {
                    return Err(Error::Protocol(ProtocolError::OutOfOrderMessage(
                        "repeated SSLRequest after TLS was established",
                    )));
                }
                match config.tls.clone() {
                    Some(acceptor) => {
                        framed = upgrade_tls(config, framed, acceptor).await?;
                        tls_active = true;
                    }
                    None => {
                        framed.get_mut().write_all(b"N").await?;
                        framed.get_mut().flush().await?;
                    }
                }
            }
            StartupMessage::GssEncRequest => {
                framed.get_mut().write_all(b"N").await?;
                framed.get_mut().flush().await?;
            }
            StartupMessage::CancelRequest {
                process_id,
                secret_key,
            } => {
                return Ok(HandshakeOutcome::Cancel {
                    pid: process_id,
                    secret_key,
                });
            }
            StartupMessage::Startup { parameters, .. } => {
                debug!(user = %parameters.user, database = ?parameters.database, "startup");
                return authenticate(config, framed, parameters, pid, secret_key).await;
            }
        }
    }
}

/// Reads the next startup-phase message, honouring the configured deadline.
async fn read_startup(
    config: &ServerConfig,
    framed: &mut StartupFramed,
) -> Result<StartupMessage, Error> {
    let next = match config.startup_timeout {
        Some(timeout) => tokio::time::timeout(timeout, framed.next())
            .await
            .map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "startup message timed out",
                ))
            })?,
        None => framed.next().await,
    };

    Ok(next.ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed during handshake",
        ))
    })??)
}

/// Answers 'S' and wraps the stream in TLS.
async fn upgrade_tls(
    config: &ServerConfig,
    mut framed: StartupFramed,
    acceptor: tokio_rustls::TlsAcceptor,
) -> Result<StartupFramed, Error> {
    framed.get_mut().write_all(b"S").await?;
    framed.get_mut().flush().await?;

    let parts = framed.into_parts();

    // The client must wait for our 'S' before its TLS hello, so no
    // plaintext may be buffered past the request.
    if !parts.read_buf.is_empty() {
        return Err(Error::Protocol(ProtocolError::OutOfOrderMessage(
            "data received before TLS negotiation completed",
        )));
    }

    let MaybeTlsStream::Plain(stream) = parts.io else {
        return Err(Error::Protocol(ProtocolError::OutOfOrderMessage(
            "repeated SSLRequest after TLS was established",
        )));
    };

    let tls = acceptor.accept(stream).await?;
    debug!("TLS established");
    Ok(Framed::new(
        MaybeTlsStream::Tls(Box::new(tls)),
        StartupCodec::with_max_message_size(config.max_message_size),
    ))
}

/// Runs the configured authentication exchange and, on success, sends the
/// session announce: `AuthenticationOk`, the parameter burst,
/// `BackendKeyData` and the first `ReadyForQuery`.
async fn authenticate(
    config: &ServerConfig,
    framed: StartupFramed,
    parameters: StartupParameters,
    pid: i32,
    secret_key: i32,
) -> Result<HandshakeOutcome, Error> {
    // Typed ('p') messages follow from here on.
    let mut framed = framed.map_codec(StartupCodec::ready);
    let user = parameters.user.clone();

    let verdict = match &config.auth {
        AuthStrategy::Trust => Ok(()),
        AuthStrategy::ClearText(verify) => {
            framed
                .send(BackendMessage::AuthenticationCleartextPassword)
                .await?;
            let password = cstring_payload(&read_password(&mut framed).await?)?;
            match verify(user.clone(), password).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(auth_failed(&user)),
                Err(info) => Err(info),
            }
        }
        AuthStrategy::Md5(verify) => {
            let salt: [u8; 4] = rand::random();
            framed
                .send(BackendMessage::AuthenticationMd5Password { salt })
                .await?;
            let received = cstring_payload(&read_password(&mut framed).await?)?;
            match verify(user.clone(), received, salt).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(auth_failed(&user)),
                Err(info) => Err(info),
            }
        }
        AuthStrategy::ScramSha256(secret_fn) => scram(&mut framed, secret_fn, &user).await?,
    };

    if let Err(info) = verdict {
        debug!(user = %user, "authentication failed");
        framed.send(info.into()).await?;
        framed.flush().await?;
        return Ok(HandshakeOutcome::Rejected);
    }

    framed.send(BackendMessage::AuthenticationOk).await?;

    let mut announced: Vec<(String, String)> = vec![
        ("server_version".to_string(), config.version.clone()),
        ("server_encoding".to_string(), "UTF8".to_string()),
        ("client_encoding".to_string(), "UTF8".to_string()),
        ("DateStyle".to_string(), "ISO, MDY".to_string()),
        ("TimeZone".to_string(), "UTC".to_string()),
        ("integer_datetimes".to_string(), "on".to_string()),
        ("standard_conforming_strings".to_string(), "on".to_string()),
    ];
    for (name, value) in &config.parameters {
        match announced.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.clone(),
            None => announced.push((name.clone(), value.clone())),
        }
    }

    for (name, value) in announced {
        framed
            .send(BackendMessage::ParameterStatus { name, value })
            .await?;
    }

    framed
        .send(BackendMessage::BackendKeyData {
            process_id: pid,
            secret_key,
        })
        .await?;
    framed
        .send(BackendMessage::ReadyForQuery {
            status: TransactionStatus::Idle,
        })
        .await?;
    framed.flush().await?;

    Ok(HandshakeOutcome::Ready { framed, parameters })
}

/// Runs the SCRAM-SHA-256 exchange. Returns `Ok(Err(info))` for credential
/// failures (reported then closed) and `Err` for transport failures.
async fn scram(
    framed: &mut MessageFramed,
    secret_fn: &ScramSecretFn,
    user: &str,
) -> Result<Result<(), ErrorInfo>, Error> {
    framed
        .send(BackendMessage::AuthenticationSasl {
            mechanisms: vec!["SCRAM-SHA-256".to_string()],
        })
        .await?;

    let initial = read_password(framed).await?;
    let (mechanism, client_first) = match parse_sasl_initial(&initial) {
        Ok(parsed) => parsed,
        Err(info) => return Ok(Err(info)),
    };
    if mechanism != "SCRAM-SHA-256" {
        return Ok(Err(auth_failed(user)));
    }
    let Ok(client_first) = String::from_utf8(client_first) else {
        return Ok(Err(auth_failed(user)));
    };

    let secret = match secret_fn(user.to_string()).await {
        Ok(secret) => secret,
        Err(info) => return Ok(Err(info)),
    };
    let exchange = match ScramExchange::start(secret, &client_first) {
        Ok(exchange) => exchange,
        Err(_) => return Ok(Err(auth_failed(user))),
    };

    framed
        .send(BackendMessage::AuthenticationSaslContinue {
            data: exchange.server_first().as_bytes().to_vec(),
        })
        .await?;

    let response = read_password(framed).await?;
    let Ok(client_final) = String::from_utf8(response.to_vec()) else {
        return Ok(Err(auth_failed(user)));
    };

    let server_final = match exchange.finish(&client_final) {
        Ok(server_final) => server_final,
        Err(_) => return Ok(Err(auth_failed(user))),
    };
    framed
        .send(BackendMessage::AuthenticationSaslFinal {
            data: server_final.into_bytes(),
        })
        .await?;

    Ok(Ok(()))
}

/// Reads the next 'p' message; anything else is out of order.
async fn read_password(framed: &mut MessageFramed) -> Result<Bytes, Error> {
    let message = framed.next().await.ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed during authentication",
        ))
    })??;

    match message {
        FrontendMessage::Password(data) => Ok(data),
        _ => Err(Error::Protocol(ProtocolError::OutOfOrderMessage(
            "expected a password message",
        ))),
    }
}

/// Interprets a password payload as a null-terminated string.
fn cstring_payload(data: &Bytes) -> Result<String, Error> {
    let end = data
        .iter()
        .position(|&b| b == 0)
        .ok_or(Error::Protocol(ProtocolError::InvalidMessage))?;
    String::from_utf8(data[..end].to_vec())
        .map_err(|_| Error::Protocol(ProtocolError::InvalidUtf8))
}

/// Parses a SASLInitialResponse: mechanism name plus optional initial data.
fn parse_sasl_initial(data: &Bytes) -> Result<(String, Vec<u8>), ErrorInfo> {
    let end = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| malformed_sasl())?;
    let mechanism =
        String::from_utf8(data[..end].to_vec()).map_err(|_| malformed_sasl())?;

    let rest = &data[end + 1..];
    if rest.len() < 4 {
        return Err(malformed_sasl());
    }
    let length = i32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
    let payload = if length < 0 {
        Vec::new()
    } else {
        rest[4..].to_vec()
    };
    Ok((mechanism, payload))
}

fn malformed_sasl() -> ErrorInfo {
    ErrorInfo::with_code(sql_state::PROTOCOL_VIOLATION, "malformed SASLInitialResponse")
        .severity("FATAL")
}

fn auth_failed(user: &str) -> ErrorInfo {
    ErrorInfo::with_code(
        sql_state::INVALID_PASSWORD,
        format!("password authentication failed for user \"{}\"", user),
    )
    .severity("FATAL")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sasl_initial() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"SCRAM-SHA-256\0");
        raw.extend_from_slice(&24i32.to_be_bytes());
        raw.extend_from_slice(b"n,,n=alice,r=clientnonce");

        let (mechanism, data) = parse_sasl_initial(&Bytes::from(raw)).unwrap();
        assert_eq!(mechanism, "SCRAM-SHA-256");
        assert_eq!(data, b"n,,n=alice,r=clientnonce");
    }

    #[test]
    fn test_parse_sasl_initial_no_data() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"SCRAM-SHA-256\0");
        raw.extend_from_slice(&(-1i32).to_be_bytes());

        let (mechanism, data) = parse_sasl_initial(&Bytes::from(raw)).unwrap();
        assert_eq!(mechanism, "SCRAM-SHA-256");
        assert!(data.is_empty());
    }

    #[test]
    fn test_cstring_payload() {
        let payload = Bytes::from_static(b"secret\0");
        assert_eq!(cstring_payload(&payload).unwrap(), "secret");

        let missing_nul = Bytes::from_static(b"secret");
        assert!(cstring_payload(&missing_nul).is_err());
    }
}
