//! In-process connector for tests.
//!
//! Every connection attempt hands a [`RemoteEnd`] to the paired
//! [`MemoryServer`]. The remote end pushes frames, fails the connection or
//! closes it. Dropping a remote end closes its connection cleanly.
//!
//! ```text
//!   MemoryConnector ──connect()──► MemoryServer::accept() ─► RemoteEnd
//!        │                                                    │
//!        └──── MemoryConnection::recv() ◄──── push_text() ────┘
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::traits::{Connection, Connector, Frame, TransportError};

#[derive(Debug)]
enum Inbound {
    Frame(Frame),
    Error(String),
    Close,
}

#[derive(Debug, Default)]
struct State {
    urls: Vec<Url>,
    refusing: bool,
    manual_handshake: bool,
    max_message_size: Option<usize>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    accepted: mpsc::UnboundedSender<RemoteEnd>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Connector whose connections are driven by a [`MemoryServer`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

/// Test side of a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryServer {
    shared: Arc<Shared>,
    accepted: mpsc::UnboundedReceiver<RemoteEnd>,
}

impl MemoryConnector {
    /// Create a connector whose handshakes complete immediately.
    #[must_use]
    pub fn pair() -> (Self, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            accepted: tx,
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MemoryServer {
                shared,
                accepted: rx,
            },
        )
    }

    /// Create a connector whose handshakes wait for
    /// [`RemoteEnd::accept`] or [`RemoteEnd::refuse`].
    #[must_use]
    pub fn manual() -> (Self, MemoryServer) {
        let (connector, server) = Self::pair();
        connector.shared.state().manual_handshake = true;
        (connector, server)
    }
}

impl MemoryServer {
    /// Wait for the next connection attempt.
    ///
    /// Returns `None` once every connector clone is gone.
    pub async fn accept(&mut self) -> Option<RemoteEnd> {
        self.accepted.recv().await
    }

    /// Take the next connection attempt if one is already queued.
    pub fn try_accept(&mut self) -> Option<RemoteEnd> {
        self.accepted.try_recv().ok()
    }

    /// Number of connection attempts so far, including refused ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.shared.state().urls.len()
    }

    /// URLs of all connection attempts, in order.
    #[must_use]
    pub fn urls(&self) -> Vec<Url> {
        self.shared.state().urls.clone()
    }

    /// Refuse every handshake while set.
    pub fn set_refusing(&self, refusing: bool) {
        self.shared.state().refusing = refusing;
    }

    /// Inbound size limit for connections opened from now on.
    pub fn set_max_message_size(&self, max: Option<usize>) {
        self.shared.state().max_message_size = max;
    }
}

/// Server side of one memory connection.
#[derive(Debug)]
pub struct RemoteEnd {
    url: Url,
    inbound: mpsc::UnboundedSender<Inbound>,
    handshake: Mutex<Option<oneshot::Sender<Result<(), String>>>>,
    closed_by_client: Arc<AtomicBool>,
}

impl RemoteEnd {
    /// The URL the client connected to.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Complete a pending manual handshake.
    pub fn accept(&self) {
        self.finish_handshake(Ok(()));
    }

    /// Fail a pending manual handshake.
    pub fn refuse(&self, reason: &str) {
        self.finish_handshake(Err(reason.to_string()));
    }

    fn finish_handshake(&self, result: Result<(), String>) {
        let pending = self
            .handshake
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = pending {
            let _ = tx.send(result);
        }
    }

    /// Push a text frame. Returns `false` if the client side is gone.
    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.push(Inbound::Frame(Frame::Text(text.into())))
    }

    /// Push a binary frame. Returns `false` if the client side is gone.
    pub fn push_binary(&self, data: impl Into<Vec<u8>>) -> bool {
        self.push(Inbound::Frame(Frame::Binary(data.into())))
    }

    /// Fail the connection with a receive error.
    pub fn fail(&self, reason: &str) -> bool {
        self.push(Inbound::Error(reason.to_string()))
    }

    /// Close the connection cleanly.
    pub fn close(&self) -> bool {
        self.push(Inbound::Close)
    }

    /// Check whether the client closed this connection.
    #[must_use]
    pub fn closed_by_client(&self) -> bool {
        self.closed_by_client.load(Ordering::SeqCst)
    }

    fn push(&self, inbound: Inbound) -> bool {
        self.inbound.send(inbound).is_ok()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError> {
        let (refusing, manual, max_message_size) = {
            let mut state = self.shared.state();
            state.urls.push(url.clone());
            (state.refusing, state.manual_handshake, state.max_message_size)
        };

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (handshake_tx, handshake_rx) = oneshot::channel();
        let closed_by_client = Arc::new(AtomicBool::new(false));

        let remote = RemoteEnd {
            url: url.clone(),
            inbound: inbound_tx,
            handshake: Mutex::new(Some(handshake_tx)),
            closed_by_client: Arc::clone(&closed_by_client),
        };
        let _ = self.shared.accepted.send(remote);

        if refusing {
            return Err(TransportError::Handshake("connection refused".into()));
        }
        if manual {
            match handshake_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(reason)) => return Err(TransportError::Handshake(reason)),
                Err(_) => return Err(TransportError::Handshake("remote end dropped".into())),
            }
        }

        Ok(Box::new(MemoryConnection {
            inbound: inbound_rx,
            is_open: true,
            closed_by_client,
            max_message_size,
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Client side of one memory connection.
#[derive(Debug)]
pub struct MemoryConnection {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    is_open: bool,
    closed_by_client: Arc<AtomicBool>,
    max_message_size: Option<usize>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        if !self.is_open {
            return Ok(None);
        }
        match self.inbound.recv().await {
            Some(Inbound::Frame(frame)) => match self.max_message_size {
                Some(max) if frame.len() > max => Err(TransportError::FrameTooLarge {
                    size: frame.len(),
                    max,
                }),
                _ => Ok(Some(frame)),
            },
            Some(Inbound::Error(reason)) => {
                self.is_open = false;
                Err(TransportError::ReceiveFailed(reason))
            }
            Some(Inbound::Close) | None => {
                self.is_open = false;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.is_open = false;
        self.closed_by_client.store(true, Ordering::SeqCst);
        self.inbound.close();
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".into())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
