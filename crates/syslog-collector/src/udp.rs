// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! UDP syslog listener. Every datagram is one message candidate.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::errors::ListenerError;
use crate::normalizer::normalize;
use crate::queue::MessageSink;

const TRANSPORT: &str = "udp";

/// Configuration for the UDP listener
pub struct UdpListenerConfig {
    /// Host to bind to (e.g., "0.0.0.0")
    pub host: String,
    /// Port to bind to, 0 picks an ephemeral one
    pub port: u16,
    /// Receive buffer size; longer datagrams are truncated by the socket
    pub buffer_size: usize,
}

pub struct UdpListener {
    socket: UdpSocket,
    buffer_size: usize,
    sink: Arc<dyn MessageSink>,
}

impl UdpListener {
    pub async fn bind(
        config: &UdpListenerConfig,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self, ListenerError> {
        let addr = format!("{}:{}", config.host, config.port);
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|source| ListenerError::Bind {
                transport: TRANSPORT,
                addr,
                source,
            })?;

        Ok(UdpListener {
            socket,
            buffer_size: config.buffer_size,
            sink,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ListenerError> {
        self.socket
            .local_addr()
            .map_err(|source| ListenerError::LocalAddr {
                transport: TRANSPORT,
                source,
            })
    }

    /// Receives datagrams until `cancel_token` fires.
    ///
    /// Normalization and delivery run on their own task so the socket is read
    /// again immediately. Those tasks are not awaited on shutdown.
    pub async fn spin(self, cancel_token: CancellationToken) {
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            let received = tokio::select! {
                () = cancel_token.cancelled() => {
                    debug!("UDP listener cancelled");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((0, _)) => {}
                Ok((len, src)) => {
                    trace!("Received {len} bytes from {src}");
                    let data = buf[..len].to_vec();
                    let sink = Arc::clone(&self.sink);
                    tokio::spawn(async move {
                        let message = normalize(&data, &src.ip().to_string());
                        sink.push(message).await;
                    });
                }
                Err(e) => error!("UDP receive error: {e}"),
            }
        }
    }
}
