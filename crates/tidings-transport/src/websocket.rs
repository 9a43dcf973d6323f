//! WebSocket connector.
//!
//! Opens client connections with tokio-tungstenite. `wss://` URLs need the
//! `tls` feature, which uses rustls with the ring provider and webpki roots.
//!
//! A message over the size limit is reported as a non-fatal
//! [`TransportError::FrameTooLarge`] and skipped; the connection stays open.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};
use url::Url;

use crate::traits::{Connection, Connector, Frame, TransportError};

/// Default inbound message limit.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket connector configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// How long the TCP connect plus upgrade handshake may take.
    pub connect_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// WebSocket connector.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    /// Create a connector with the given configuration.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// The connector configuration.
    #[must_use]
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

#[cfg(feature = "tls")]
fn install_crypto_provider() {
    static INSTALL: std::sync::Once = std::sync::Once::new();
    INSTALL.call_once(|| {
        // Err means another provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError> {
        debug!(url = %url, "Opening WebSocket");

        #[cfg(feature = "tls")]
        install_crypto_provider();

        let (stream, response) =
            tokio::time::timeout(self.config.connect_timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| match e {
                    WsError::Io(io) => TransportError::Io(io),
                    other => TransportError::Handshake(other.to_string()),
                })?;

        debug!(url = %url, status = %response.status(), "WebSocket handshake completed");

        Ok(Box::new(WebSocketConnection::new(
            stream,
            self.config.max_message_size,
        )))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// A client WebSocket connection.
pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    remote_addr: Option<String>,
    is_open: bool,
    max_message_size: usize,
}

impl WebSocketConnection {
    fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, max_message_size: usize) -> Self {
        let remote_addr = match stream.get_ref() {
            MaybeTlsStream::Plain(tcp) => tcp.peer_addr().ok().map(|a| a.to_string()),
            _ => None,
        };
        Self {
            stream,
            remote_addr,
            is_open: true,
            max_message_size,
        }
    }

    fn check_size(&self, size: usize) -> Result<(), TransportError> {
        if size > self.max_message_size {
            warn!(size, max = self.max_message_size, "Message too large");
            return Err(TransportError::FrameTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        if !self.is_open {
            return Ok(None);
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.check_size(text.len())?;
                    return Ok(Some(Frame::Text(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    self.check_size(data.len())?;
                    return Ok(Some(Frame::Binary(data)));
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    debug!("WebSocket stream ended");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(());
        }

        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Other(format!("Failed to close: {e}"))),
        }
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
