//! Individual client session handling

use anyhow::{anyhow, Result};
use callcenter_shared::{
    codec::{self, FrameDecoder},
    Request, Response,
};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Server-assigned identifier of one TCP connection
pub type SessionId = u64;

/// Responses buffered per session; further responses are dropped until the
/// client catches up
const OUTBOUND_CAPACITY: usize = 32;

/// Handle to send responses to a specific client
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub addr: SocketAddr,
    outbound: mpsc::Sender<Response>,
    /// When the connection was accepted
    pub connected_at: Instant,
}

impl SessionHandle {
    /// Create a handle whose responses are delivered to `outbound`
    pub fn new(id: SessionId, addr: SocketAddr, outbound: mpsc::Sender<Response>) -> Self {
        Self {
            id,
            addr,
            outbound,
            connected_at: Instant::now(),
        }
    }

    /// Queue a response for this client without waiting
    ///
    /// Fails if the client is not keeping up with its replies or the session
    /// has closed.
    pub fn send(&self, response: Response) -> Result<()> {
        self.outbound.try_send(response).map_err(|e| match e {
            TrySendError::Full(_) => anyhow!("Session {} outbound queue full", self.id),
            TrySendError::Closed(_) => anyhow!("Session {} closed", self.id),
        })
    }
}

/// Active client session
pub struct ClientSession {
    pub handle: SessionHandle,
    reader: OwnedReadHalf,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl ClientSession {
    /// Create a new session from a TCP stream and start its writer task
    pub fn new(id: SessionId, stream: TcpStream, addr: SocketAddr) -> Self {
        let (reader, mut writer) = stream.into_split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Response>(OUTBOUND_CAPACITY);

        tokio::spawn(async move {
            while let Some(response) = outbound_rx.recv().await {
                let encoded = match codec::encode(&response) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        error!("Failed to encode response for {}: {}", addr, e);
                        continue;
                    }
                };
                if let Err(e) = writer.write_all(&encoded).await {
                    warn!("Write error to {}: {}", addr, e);
                    break;
                }
            }
        });

        Self {
            handle: SessionHandle::new(id, addr, outbound_tx),
            reader,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    /// Get a cloneable handle for sending responses
    pub fn get_handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Read the next well-formed request from this session
    ///
    /// Malformed envelopes are dropped without a reply and the session stays
    /// open. Returns None once the connection is closed.
    pub async fn recv(&mut self) -> Option<Request> {
        loop {
            // First try to decode from existing buffer
            match self.decoder.decode_next::<Request>() {
                Ok(Some(request)) => return Some(request),
                Ok(None) => {
                    // Need more data
                }
                Err(e) if e.is_recoverable() => {
                    debug!("Dropping malformed request from {}: {}", self.handle.addr, e);
                    continue;
                }
                Err(e) => {
                    debug!("Discarding unframeable input from {}: {}", self.handle.addr, e);
                    self.decoder.reset();
                }
            }

            // Read more data
            match self.reader.read(&mut self.read_buf).await {
                Ok(0) => return None,
                Ok(n) => {
                    self.decoder.extend(&self.read_buf[..n]);
                }
                Err(e) => {
                    warn!("Read error from {}: {}", self.handle.addr, e);
                    return None;
                }
            }
        }
    }

    /// Get the session ID
    pub fn id(&self) -> SessionId {
        self.handle.id
    }

    /// Get the remote address
    pub fn addr(&self) -> SocketAddr {
        self.handle.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Length-prefixed frame with an arbitrary body
    fn raw_frame(body: &[u8]) -> Vec<u8> {
        let mut out = (body.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(body);
        out
    }

    async fn connected_pair() -> (ClientSession, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, peer) = listener.accept().await.unwrap();
        (ClientSession::new(1, server_side, peer), client)
    }

    #[tokio::test]
    async fn test_malformed_requests_are_skipped() {
        let (mut session, mut client) = connected_pair().await;

        client.write_all(&raw_frame(b"garbage")).await.unwrap();
        client.write_all(&raw_frame(br#"{"id":"1"}"#)).await.unwrap();
        client
            .write_all(&codec::encode(&Request::new("call", "1")).unwrap())
            .await
            .unwrap();

        let request = session.recv().await.expect("session should stay open");
        assert_eq!(request, Request::new("call", "1"));
    }

    #[tokio::test]
    async fn test_responses_are_framed() {
        let (session, mut client) = connected_pair().await;

        session
            .get_handle()
            .send(Response::new("Call 1 missed"))
            .unwrap();

        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; 256];
        let response: Response = loop {
            let n = client.read(&mut buf).await.unwrap();
            decoder.extend(&buf[..n]);
            if let Some(response) = decoder.decode_next().unwrap() {
                break response;
            }
        };
        assert_eq!(response.response, "Call 1 missed");
    }

    #[tokio::test]
    async fn test_send_fails_fast_when_client_lags() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = SessionHandle::new(7, "127.0.0.1:9".parse().unwrap(), tx);

        handle.send(Response::new("first")).unwrap();
        let err = handle.send(Response::new("second")).unwrap_err();
        assert!(err.to_string().contains("full"));

        assert_eq!(rx.recv().await.unwrap().response, "first");
        drop(rx);
        let err = handle.send(Response::new("third")).unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_at_tracks_session_age() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = SessionHandle::new(3, "127.0.0.1:9".parse().unwrap(), tx);

        tokio::time::advance(std::time::Duration::from_secs(90)).await;
        assert!(handle.connected_at.elapsed() >= std::time::Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_recv_returns_none_on_close() {
        let (mut session, client) = connected_pair().await;
        drop(client);
        assert!(session.recv().await.is_none());
    }
}
