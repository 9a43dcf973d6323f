//! Transport abstraction traits.
//!
//! These traits define what the channel runtime needs from a transport,
//! so the runtime stays independent of the wire protocol.

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// One inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text message.
    Text(String),
    /// A binary message.
    Binary(Vec<u8>),
}

impl Frame {
    /// The frame payload as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Check if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection attempt timed out.
    #[error("Connection timed out")]
    Timeout,

    /// The handshake was refused or failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// An inbound message exceeded the configured limit. The message is
    /// dropped; the connection stays usable.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Size of the offending message.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether the connection is unusable after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::FrameTooLarge { .. })
    }
}

/// Opens outbound connections.
///
/// Connectors are shared between connection tasks, so they must be
/// `Send + Sync`.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`.
    ///
    /// Resolves once the handshake has completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the connector name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}

/// An open connection to the event stream.
#[async_trait]
pub trait Connection: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` once the connection is closed cleanly.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection failed, or a non-fatal error (see
    /// [`TransportError::is_fatal`]) for a single dropped message after
    /// which `recv` may be called again.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Close the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake could not be sent.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}
