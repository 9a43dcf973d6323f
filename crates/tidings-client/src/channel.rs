//! Public channel handle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tidings_core::{ChannelMachine, ChannelStatus, ChannelTimings, ConnectionId, EndpointConfig, Event, ListenerId};
use tidings_transport::{Connector, WebSocketConnector};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::config::ChannelConfig;
use crate::driver::{Driver, Request};

/// Handle to a realtime event channel.
///
/// Clones share the same channel. The background driver stops once every
/// clone and every [`Subscription`] is dropped.
#[derive(Clone)]
pub struct RealtimeChannel {
    requests: mpsc::UnboundedSender<Request>,
    next_listener: Arc<AtomicU64>,
}

impl RealtimeChannel {
    /// Create a channel that connects over WebSocket.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(config: &ChannelConfig) -> Self {
        let connector = WebSocketConnector::new(config.websocket_config());
        Self::with_connector(config.endpoint_config(), config.timings(), Arc::new(connector))
    }

    /// Create a channel over an arbitrary connector.
    ///
    /// Nothing connects until the first listener is added or
    /// [`connect`](Self::connect) is called.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn with_connector(
        endpoint: EndpointConfig,
        timings: ChannelTimings,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let machine = ChannelMachine::new(endpoint, timings);
        tokio::spawn(Driver::new(machine, connector, rx).run());
        Self {
            requests: tx,
            next_listener: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a listener and make sure a connection is being established.
    ///
    /// The listener receives every decoded event until the returned
    /// [`Subscription`] is disposed or dropped. Listeners run on the driver
    /// task and should return quickly. A listener that panics is logged and
    /// skipped for that event; builds with `panic = "abort"` still abort.
    pub fn add_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = ListenerId::new(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.send(Request::AddListener {
            id,
            listener: Arc::new(listener),
        });
        Subscription {
            id,
            requests: self.requests.clone(),
            active: AtomicBool::new(true),
        }
    }

    /// Establish a connection unless one exists.
    ///
    /// Returns the current or newly started connection. Returns `None` when
    /// no endpoint is configured, or when the attempt was throttled and no
    /// connection exists.
    pub async fn connect(&self) -> Option<ConnectionId> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Connect { reply });
        rx.await.ok().flatten()
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Listeners stay registered. The next [`add_listener`](Self::add_listener)
    /// or [`connect`](Self::connect) starts over.
    pub fn close_connection(&self) {
        self.send(Request::Close);
    }

    /// Snapshot of the channel state.
    ///
    /// Returns `None` if the driver has stopped.
    pub async fn status(&self) -> Option<ChannelStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Status { reply });
        rx.await.ok()
    }

    fn send(&self, request: Request) {
        if self.requests.send(request).is_err() {
            debug!("Channel driver is gone, request dropped");
        }
    }
}

/// A listener registration.
///
/// Dropping the subscription removes the listener.
#[must_use = "dropping a Subscription removes its listener"]
pub struct Subscription {
    id: ListenerId,
    requests: mpsc::UnboundedSender<Request>,
    active: AtomicBool,
}

impl Subscription {
    /// The listener's ID.
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Check whether the listener is still registered by this handle.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the listener.
    ///
    /// Returns `true` the first time. Later calls do nothing.
    pub fn dispose(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        let _ = self.requests.send(Request::RemoveListener { id: self.id });
        true
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("closed", &self.requests.is_closed())
            .finish()
    }
}
