//! Test utilities for wire-level integration tests.
//!
//! Provides an in-process server bound to an ephemeral port and a minimal
//! protocol client speaking raw frames over a `TcpStream`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use pgfront::Server;

/// A test server wrapper that handles setup and teardown.
///
/// The server starts when created and the serve task is aborted on drop.
pub struct TestServer {
    pub addr: SocketAddr,
    pub server: Arc<Server>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Binds an ephemeral port and starts serving.
    pub async fn start(server: Server) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(server);

        let serving = server.clone();
        let handle = tokio::spawn(async move {
            let _ = serving.serve(listener).await;
        });

        Self {
            addr,
            server,
            handle,
        }
    }

    /// Opens a new client connection to this server.
    pub async fn connect(&self) -> WireClient {
        WireClient::connect(self.addr).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Backend key data captured during a handshake.
#[derive(Debug, Clone, Copy)]
pub struct BackendKey {
    pub pid: i32,
    pub secret_key: i32,
}

/// A raw-protocol client for driving the server byte by byte.
pub struct WireClient {
    stream: TcpStream,
}

impl WireClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
        }
    }

    // --- outbound frames ---

    pub async fn send_startup(&mut self, params: &[(&str, &str)]) {
        let mut body = Vec::new();
        body.extend_from_slice(&196608i32.to_be_bytes());
        for (name, value) in params {
            body.extend_from_slice(name.as_bytes());
            body.push(0);
            body.extend_from_slice(value.as_bytes());
            body.push(0);
        }
        body.push(0);

        let mut frame = Vec::new();
        frame.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
        frame.extend_from_slice(&body);
        self.stream.write_all(&frame).await.unwrap();
    }

    /// Sends an SSLRequest and returns the server's single-byte answer.
    pub async fn ssl_request(&mut self) -> u8 {
        let mut frame = Vec::new();
        frame.extend_from_slice(&8i32.to_be_bytes());
        frame.extend_from_slice(&80877103i32.to_be_bytes());
        self.stream.write_all(&frame).await.unwrap();
        self.stream.read_u8().await.unwrap()
    }

    pub async fn send_cancel(&mut self, key: BackendKey) {
        let mut frame = Vec::new();
        frame.extend_from_slice(&16i32.to_be_bytes());
        frame.extend_from_slice(&80877102i32.to_be_bytes());
        frame.extend_from_slice(&key.pid.to_be_bytes());
        frame.extend_from_slice(&key.secret_key.to_be_bytes());
        self.stream.write_all(&frame).await.unwrap();
    }

    async fn send_typed(&mut self, ty: u8, body: &[u8]) {
        let mut frame = Vec::with_capacity(body.len() + 5);
        frame.push(ty);
        frame.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
        frame.extend_from_slice(body);
        self.stream.write_all(&frame).await.unwrap();
    }

    pub async fn send_query(&mut self, sql: &str) {
        let mut body = sql.as_bytes().to_vec();
        body.push(0);
        self.send_typed(b'Q', &body).await;
    }

    pub async fn send_parse(&mut self, name: &str, sql: &str, param_oids: &[u32]) {
        let mut body = Vec::new();
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        body.extend_from_slice(sql.as_bytes());
        body.push(0);
        body.extend_from_slice(&(param_oids.len() as i16).to_be_bytes());
        for oid in param_oids {
            body.extend_from_slice(&(*oid as i32).to_be_bytes());
        }
        self.send_typed(b'P', &body).await;
    }

    pub async fn send_bind(&mut self, portal: &str, statement: &str, params: &[Option<&str>]) {
        let mut body = Vec::new();
        body.extend_from_slice(portal.as_bytes());
        body.push(0);
        body.extend_from_slice(statement.as_bytes());
        body.push(0);
        body.extend_from_slice(&0i16.to_be_bytes()); // all-text parameters
        body.extend_from_slice(&(params.len() as i16).to_be_bytes());
        for param in params {
            match param {
                Some(value) => {
                    body.extend_from_slice(&(value.len() as i32).to_be_bytes());
                    body.extend_from_slice(value.as_bytes());
                }
                None => body.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        body.extend_from_slice(&0i16.to_be_bytes()); // default result formats
        self.send_typed(b'B', &body).await;
    }

    pub async fn send_describe(&mut self, kind: u8, name: &str) {
        let mut body = vec![kind];
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        self.send_typed(b'D', &body).await;
    }

    pub async fn send_execute(&mut self, portal: &str, max_rows: i32) {
        let mut body = Vec::new();
        body.extend_from_slice(portal.as_bytes());
        body.push(0);
        body.extend_from_slice(&max_rows.to_be_bytes());
        self.send_typed(b'E', &body).await;
    }

    pub async fn send_close(&mut self, kind: u8, name: &str) {
        let mut body = vec![kind];
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        self.send_typed(b'C', &body).await;
    }

    pub async fn send_sync(&mut self) {
        self.send_typed(b'S', &[]).await;
    }

    pub async fn send_terminate(&mut self) {
        self.send_typed(b'X', &[]).await;
    }

    pub async fn send_password(&mut self, password: &str) {
        let mut body = password.as_bytes().to_vec();
        body.push(0);
        self.send_typed(b'p', &body).await;
    }

    // --- inbound frames ---

    /// Reads one backend message: `(type, payload)`.
    pub async fn read_message(&mut self) -> (u8, Vec<u8>) {
        let ty = self.stream.read_u8().await.unwrap();
        let len = self.stream.read_i32().await.unwrap();
        assert!(len >= 4, "invalid backend message length {}", len);
        let mut payload = vec![0u8; (len - 4) as usize];
        self.stream.read_exact(&mut payload).await.unwrap();
        (ty, payload)
    }

    /// Reads messages up to and including ReadyForQuery, returning the type
    /// bytes in order together with each payload.
    pub async fn read_until_ready(&mut self) -> Vec<(u8, Vec<u8>)> {
        let mut messages = Vec::new();
        loop {
            let (ty, payload) = self.read_message().await;
            let done = ty == b'Z';
            messages.push((ty, payload));
            if done {
                return messages;
            }
        }
    }

    /// True when the server closed the stream without further data.
    pub async fn expect_eof(&mut self) -> bool {
        let mut byte = [0u8; 1];
        matches!(self.stream.read(&mut byte).await, Ok(0))
    }

    /// Performs a full trust handshake and returns the backend key.
    pub async fn handshake_as(&mut self, user: &str) -> BackendKey {
        self.send_startup(&[("user", user), ("database", "app")])
            .await;

        let (ty, payload) = self.read_message().await;
        assert_eq!(ty, b'R', "expected AuthenticationOk first");
        assert_eq!(&payload[..4], &0i32.to_be_bytes());

        self.finish_handshake().await
    }

    /// Consumes parameter statuses, BackendKeyData and the first
    /// ReadyForQuery after authentication has succeeded.
    pub async fn finish_handshake(&mut self) -> BackendKey {
        let mut key = None;
        loop {
            let (ty, payload) = self.read_message().await;
            match ty {
                b'S' => {}
                b'K' => {
                    key = Some(BackendKey {
                        pid: i32::from_be_bytes(payload[0..4].try_into().unwrap()),
                        secret_key: i32::from_be_bytes(payload[4..8].try_into().unwrap()),
                    });
                }
                b'Z' => {
                    assert_eq!(payload, vec![b'I']);
                    return key.expect("BackendKeyData must precede ReadyForQuery");
                }
                other => panic!("unexpected message during handshake: {}", other as char),
            }
        }
    }
}

/// Parses ErrorResponse fields into a code → value map.
pub fn parse_error_fields(payload: &[u8]) -> HashMap<u8, String> {
    let mut fields = HashMap::new();
    let mut rest = payload;
    while !rest.is_empty() && rest[0] != 0 {
        let code = rest[0];
        let end = rest[1..].iter().position(|&b| b == 0).unwrap() + 1;
        fields.insert(code, String::from_utf8(rest[1..end].to_vec()).unwrap());
        rest = &rest[end + 1..];
    }
    fields
}

/// Parses a DataRow payload into its cells (`None` is NULL).
pub fn parse_data_row(payload: &[u8]) -> Vec<Option<Vec<u8>>> {
    let count = i16::from_be_bytes(payload[0..2].try_into().unwrap());
    let mut cells = Vec::with_capacity(count as usize);
    let mut rest = &payload[2..];
    for _ in 0..count {
        let len = i32::from_be_bytes(rest[0..4].try_into().unwrap());
        rest = &rest[4..];
        if len < 0 {
            cells.push(None);
        } else {
            cells.push(Some(rest[..len as usize].to_vec()));
            rest = &rest[len as usize..];
        }
    }
    cells
}

/// Type bytes of a message sequence, as a compact string for assertions.
pub fn type_string(messages: &[(u8, Vec<u8>)]) -> String {
    messages.iter().map(|(ty, _)| *ty as char).collect()
}
