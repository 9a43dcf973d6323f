//! # tidings-transport
//!
//! Client-side transport layer for the Tidings event channel.
//!
//! A [`Connector`] opens connections to a stream URL. A [`Connection`]
//! yields inbound [`Frame`]s until the peer closes it or it fails. The
//! channel runtime never sends application data, so connections are
//! receive-only.
//!
//! - **WebSocket** - `tokio-tungstenite` client (feature `websocket`, default)
//! - **Memory** - scriptable in-process connector for tests (feature `testing`)
//!
//! ```rust,ignore
//! use tidings_transport::{Connector, WebSocketConnector};
//!
//! let connector = WebSocketConnector::default();
//! let mut conn = connector.connect(&url).await?;
//! while let Some(frame) = conn.recv().await? {
//!     println!("{} bytes", frame.len());
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

pub use traits::{Connection, Connector, Frame, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketConnector};

#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryConnector, MemoryServer, RemoteEnd};
