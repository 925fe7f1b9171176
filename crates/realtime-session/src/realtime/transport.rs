//! Push channel transport.
//!
//! The connection only needs to open a socket at a URL, read text frames in order,
//! and close it. [`WebSocketTransport`] provides that over tokio-tungstenite.

use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};
use url::Url;

use crate::http_client::install_rustls_provider;

/// Errors reported by a transport or socket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The handshake did not complete.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Read or write failure on an open socket.
    #[error("IO error: {0}")]
    Io(String),

    /// The socket is already closed.
    #[error("Connection closed")]
    Closed,

    /// The connect URL is unusable.
    #[error("Invalid URL: {0}")]
    Url(String),
}

impl TransportError {
    pub fn connect(msg: impl Into<String>) -> Self {
        Self::Connect(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }
}

/// Opens sockets. Resolves only once the handshake has completed.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &Url) -> Result<Box<dyn Socket>, TransportError>;
}

/// An open push channel.
#[async_trait]
pub trait Socket: Send {
    /// Wait for the next text frame. `Ok(None)` means the peer closed the channel.
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError>;

    /// Close the channel.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// WebSocket transport (`ws://` and `wss://`).
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &Url) -> Result<Box<dyn Socket>, TransportError> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::Url(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }
        if url.scheme() == "wss" {
            install_rustls_provider();
        }

        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::connect(e.to_string()))?;
        debug!(status = %response.status(), "WebSocket handshake completed");

        Ok(Box::new(WebSocketSocket { stream }))
    }
}

struct WebSocketSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Socket for WebSocketSocket {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "Server closed WebSocket");
                    return Ok(None);
                }
                Some(Ok(Message::Binary(data))) => {
                    trace!(len = data.len(), "Skipping binary frame");
                }
                Some(Ok(_)) => {}
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => return Ok(None),
                Some(Err(e)) => return Err(TransportError::io(e.to_string())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(TransportError::io(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_websocket_scheme() {
        let url = Url::parse("https://example.com/realtime").unwrap();
        let err = WebSocketTransport::new().open(&url).await.err().unwrap();
        assert!(matches!(err, TransportError::Url(_)));
    }

    #[tokio::test]
    async fn test_handshake_failure_is_connect_error() {
        // Nothing listens on the discard port.
        let url = Url::parse("ws://127.0.0.1:9/realtime").unwrap();
        let err = WebSocketTransport::new().open(&url).await.err().unwrap();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
