//! Connection manager with a persistent server connection and automatic reconnection

use anyhow::{anyhow, Result};
use callcenter_shared::{
    codec::{self, FrameDecoder},
    routing, Request, Response,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

/// Events emitted by the connection manager
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Successfully connected to server
    Connected { server: String },
    /// Disconnected from server
    Disconnected { reason: String },
    /// Received a response or notification from the server
    Received(Response),
    /// A connection attempt failed; another one follows after a delay
    ConnectionFailed { reason: String },
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address
    pub server: String,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", routing::DEFAULT_PORT),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Manages the connection to the server
pub struct ConnectionManager {
    /// Channel to send requests to the server
    outbound_tx: mpsc::Sender<Request>,
    /// Channel to receive connection events
    event_rx: mpsc::Receiver<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a new connection manager and start the connection loop
    pub fn new(config: ConnectionConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Request>(100);
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(100);

        tokio::spawn(async move {
            connection_loop(config, outbound_rx, event_tx).await;
        });

        Self {
            outbound_tx,
            event_rx,
        }
    }

    /// Send a request to the server
    ///
    /// Requests issued while disconnected are delivered after reconnecting.
    pub async fn send(&self, request: Request) -> Result<()> {
        self.outbound_tx
            .send(request)
            .await
            .map_err(|_| anyhow!("Connection closed"))
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }
}

/// Main connection loop with reconnection logic
async fn connection_loop(
    config: ConnectionConfig,
    mut outbound_rx: mpsc::Receiver<Request>,
    event_tx: mpsc::Sender<ConnectionEvent>,
) {
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        match timeout(config.connect_timeout, TcpStream::connect(&config.server)).await {
            Ok(Ok(stream)) => {
                reconnect_delay = config.reconnect_delay;

                let _ = event_tx
                    .send(ConnectionEvent::Connected {
                        server: config.server.clone(),
                    })
                    .await;

                match handle_connection(stream, &mut outbound_rx, &event_tx).await {
                    // Manager dropped, nothing left to send
                    Ok(()) => break,
                    Err(reason) => {
                        let _ = event_tx
                            .send(ConnectionEvent::Disconnected {
                                reason: reason.to_string(),
                            })
                            .await;
                    }
                }
            }
            Ok(Err(e)) => {
                let _ = event_tx
                    .send(ConnectionEvent::ConnectionFailed {
                        reason: format!("{}: {}", config.server, e),
                    })
                    .await;
            }
            Err(_) => {
                let _ = event_tx
                    .send(ConnectionEvent::ConnectionFailed {
                        reason: format!("{}: connect timed out", config.server),
                    })
                    .await;
            }
        }

        if event_tx.is_closed() {
            break;
        }

        // Wait before reconnecting
        tokio::time::sleep(reconnect_delay).await;

        // Exponential backoff
        reconnect_delay = std::cmp::min(reconnect_delay * 2, config.max_reconnect_delay);
    }

    debug!("Connection loop finished");
}

/// Handle an active connection
///
/// Returns `Ok(())` when the outbound channel closes, `Err` when the
/// connection is lost.
async fn handle_connection(
    stream: TcpStream,
    outbound_rx: &mut mpsc::Receiver<Request>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];

    loop {
        tokio::select! {
            // Send outbound requests
            request = outbound_rx.recv() => {
                let Some(request) = request else {
                    return Ok(());
                };
                let encoded = codec::encode(&request)?;
                writer.write_all(&encoded).await?;
            }

            // Read incoming responses
            result = reader.read(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        return Err(anyhow!("Server closed connection"));
                    }
                    Ok(n) => {
                        decoder.extend(&read_buf[..n]);

                        // Process all complete frames
                        loop {
                            match decoder.decode_next::<Response>() {
                                Ok(Some(response)) => {
                                    let _ = event_tx.send(ConnectionEvent::Received(response)).await;
                                }
                                Ok(None) => break,
                                Err(e) if e.is_recoverable() => {
                                    debug!("Ignoring malformed response: {}", e);
                                }
                                Err(e) => {
                                    debug!("Discarding unframeable input: {}", e);
                                    decoder.reset();
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        return Err(anyhow!("Read error: {}", e));
                    }
                }
            }
        }
    }
}
