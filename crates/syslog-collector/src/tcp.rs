// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TCP syslog listener.
//!
//! Streams are framed by `\n`. Bytes after the last newline when the peer
//! goes away are discarded. The number of live connections is capped; extra
//! connections are closed as soon as they are accepted.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::constants::TCP_IDLE_TIMEOUT;
use crate::errors::ListenerError;
use crate::normalizer::normalize;
use crate::queue::MessageSink;

const TRANSPORT: &str = "tcp";

type ConnectionSet = Arc<Mutex<HashMap<u64, CancellationToken>>>;

pub struct TcpListenerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    /// Longest accepted line, terminator excluded.
    pub max_line_bytes: usize,
}

pub struct TcpListener {
    listener: Mutex<Option<tokio::net::TcpListener>>,
    local_addr: SocketAddr,
    max_connections: usize,
    max_line_bytes: usize,
    sink: Arc<dyn MessageSink>,
    connections: ConnectionSet,
    next_connection_id: AtomicU64,
    stop_token: CancellationToken,
}

impl TcpListener {
    pub async fn bind(
        config: &TcpListenerConfig,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self, ListenerError> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ListenerError::Bind {
                transport: TRANSPORT,
                addr,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::LocalAddr {
                transport: TRANSPORT,
                source,
            })?;

        Ok(TcpListener {
            listener: Mutex::new(Some(listener)),
            local_addr,
            max_connections: config.max_connections,
            max_line_bytes: config.max_line_bytes,
            sink,
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_connection_id: AtomicU64::new(0),
            stop_token: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections currently being read.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Accepts connections until `cancel_token` fires or [`stop`] is called.
    /// The listening socket is closed when this returns.
    ///
    /// Connection readers observe a child of `cancel_token`, so process
    /// shutdown reaches them without going through [`stop`].
    ///
    /// [`stop`]: TcpListener::stop
    pub async fn spin(&self, cancel_token: CancellationToken) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(listener) = listener else {
            warn!("TCP listener on {} is already running or stopped", self.local_addr);
            return;
        };

        loop {
            let accepted = tokio::select! {
                biased;
                () = cancel_token.cancelled() => {
                    debug!("TCP listener cancelled");
                    break;
                }
                () = self.stop_token.cancelled() => {
                    debug!("TCP listener stopped");
                    break;
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.register(stream, peer, &cancel_token),
                Err(e) => error!("TCP accept error: {e}"),
            }
        }
    }

    /// Stops accepting and closes every live connection. Safe to call more
    /// than once.
    pub fn stop(&self) {
        self.stop_token.cancel();
        // a listener that never spun is closed here
        drop(
            self.listener
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let mut connections = lock(&self.connections);
        for token in connections.values() {
            token.cancel();
        }
        connections.clear();
    }

    fn register(&self, stream: TcpStream, peer: SocketAddr, cancel_token: &CancellationToken) {
        let (id, connection_token) = {
            let mut connections = lock(&self.connections);
            if self.stop_token.is_cancelled() {
                return;
            }
            if connections.len() >= self.max_connections {
                warn!(
                    "Rejecting connection from {peer}: limit of {} connections reached",
                    self.max_connections
                );
                return;
            }
            let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
            let token = cancel_token.child_token();
            connections.insert(id, token.clone());
            (id, token)
        };

        debug!("Accepted TCP connection from {peer}");
        let connection = Connection {
            peer_host: peer.ip().to_string(),
            max_line_bytes: self.max_line_bytes,
            sink: Arc::clone(&self.sink),
            cancel_token: connection_token,
        };
        let connections = Arc::clone(&self.connections);
        tokio::spawn(async move {
            connection.read_lines(stream).await;
            lock(&connections).remove(&id);
            debug!("Closed TCP connection from {peer}");
        });
    }
}

fn lock(connections: &ConnectionSet) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Connection {
    /// Peer address without the port, used when a line names no host.
    peer_host: String,
    max_line_bytes: usize,
    sink: Arc<dyn MessageSink>,
    cancel_token: CancellationToken,
}

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line,
    Eof,
    TooLong,
}

impl Connection {
    async fn read_lines(&self, stream: TcpStream) {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();

        loop {
            let read = tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break,
                read = tokio::time::timeout(
                    TCP_IDLE_TIMEOUT,
                    read_line(&mut reader, &mut line, self.max_line_bytes),
                ) => read,
            };

            match read {
                // idle, look at the cancellation token again
                Err(_) => continue,
                Ok(Ok(LineRead::Line)) => {
                    let content = strip_terminator(&line);
                    if !content.is_empty() {
                        let message = normalize(content, &self.peer_host);
                        self.sink.push(message).await;
                    }
                    line.clear();
                }
                Ok(Ok(LineRead::Eof)) => {
                    if !line.is_empty() {
                        debug!(
                            "Discarding {} unterminated bytes from {}",
                            line.len(),
                            self.peer_host
                        );
                    }
                    break;
                }
                Ok(Ok(LineRead::TooLong)) => {
                    warn!(
                        "Closing connection from {}: line exceeds {} bytes",
                        self.peer_host, self.max_line_bytes
                    );
                    break;
                }
                Ok(Err(e)) => {
                    debug!("TCP read error from {}: {e}", self.peer_host);
                    break;
                }
            }
        }
    }
}

/// Appends to `line` up to and including the next `\n`.
///
/// Bytes are only moved out of the reader's buffer together with their copy
/// into `line`, so a read dropped on timeout resumes where it stopped.
async fn read_line<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    max_line_bytes: usize,
) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(LineRead::Eof);
        }

        match available.iter().position(|b| *b == b'\n') {
            Some(idx) => {
                line.extend_from_slice(&available[..=idx]);
                reader.consume(idx + 1);
                if line.len() - 1 > max_line_bytes {
                    return Ok(LineRead::TooLong);
                }
                return Ok(LineRead::Line);
            }
            None => {
                let len = available.len();
                line.extend_from_slice(available);
                reader.consume(len);
                if line.len() > max_line_bytes {
                    return Ok(LineRead::TooLong);
                }
            }
        }
    }
}

fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
