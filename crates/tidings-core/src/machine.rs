//! The channel state machine.
//!
//! [`ChannelMachine`] holds all channel state: the one connection handle,
//! the listener set, the reconnect counter, the throttle timestamp and the
//! two deferred actions (reconnect and idle close). It performs no I/O.
//! Every input is a method call carrying the current [`Instant`]; outputs are
//! [`Command`]s queued for the driver and the deadline returned by
//! [`ChannelMachine::next_deadline`].
//!
//! ```text
//!            register            open             close (listeners left)
//!   Idle ─────────────▶ Connecting ────▶ Open ───────────────────────▶ ReconnectScheduled
//!    ▲                       │                                               │
//!    │  close (manual /      │ manual close                                  │ timer
//!    │  no listeners)        ▼                                               ▼
//!    └──────────────────  Closing ◀──────────────────────────────────── Connecting
//! ```

use crate::backoff::{Backoff, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP};
use crate::endpoint::{resolve_endpoint, EndpointConfig};
use crate::event::decode;
use crate::listener::{Listener, ListenerId, ListenerSet};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use url::Url;

/// Minimum spacing between two connection attempts.
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(5_000);

/// Grace period between the last listener leaving and the connection closing.
pub const DEFAULT_IDLE_CLOSE: Duration = Duration::from_millis(750);

/// Identifies one connection attempt.
///
/// Transport events carry the ID of the handle they belong to. Events for
/// any ID other than the current handle are stale and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// The raw ID value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Channel timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTimings {
    /// Minimum spacing between connection attempts.
    pub throttle: Duration,
    /// Grace period before closing an unused connection.
    pub idle_close: Duration,
    /// Reconnect delay policy.
    pub backoff: Backoff,
}

impl Default for ChannelTimings {
    fn default() -> Self {
        Self {
            throttle: DEFAULT_THROTTLE,
            idle_close: DEFAULT_IDLE_CLOSE,
            backoff: Backoff::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP),
        }
    }
}

/// Work for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open a transport connection.
    Connect {
        /// Handle ID the connection's events must carry.
        id: ConnectionId,
        /// Endpoint to connect to.
        url: Url,
    },
    /// Close a transport connection. The handle is already discarded.
    Close {
        /// Handle to close.
        id: ConnectionId,
    },
}

/// Coarse channel phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No handle and nothing scheduled.
    Idle,
    /// A handle exists and its open has not been observed.
    Connecting,
    /// The handle is open and dispatching.
    Open,
    /// A connecting handle is marked to close once the transport settles.
    Closing,
    /// No handle, reconnect timer pending.
    ReconnectScheduled,
}

/// Result of a connection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A handle already existed and was reused.
    Existing(ConnectionId),
    /// A new connection attempt was started.
    Started(ConnectionId),
    /// The throttle rejected the attempt.
    Throttled,
    /// No usable endpoint; the channel is disabled.
    Disabled,
}

impl ConnectOutcome {
    /// The handle after the request, if any.
    #[must_use]
    pub fn connection(&self) -> Option<ConnectionId> {
        match self {
            Self::Existing(id) | Self::Started(id) => Some(*id),
            Self::Throttled | Self::Disabled => None,
        }
    }
}

/// Result of an incoming frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Delivered to this many listeners.
    Delivered(usize),
    /// The frame did not decode and was dropped.
    Dropped,
    /// The frame belongs to a discarded handle.
    Stale,
}

/// Monotonic counters of channel activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Connection attempts started.
    pub attempts_started: u64,
    /// Connection attempts rejected by the throttle.
    pub attempts_throttled: u64,
    /// Connections observed open.
    pub connections_opened: u64,
    /// Reconnects scheduled after an unexpected close.
    pub reconnects_scheduled: u64,
    /// Listener invocations.
    pub events_delivered: u64,
    /// Frames dropped because they did not decode.
    pub decode_errors: u64,
    /// Transport errors reported by the current handle.
    pub transport_errors: u64,
}

/// Point-in-time view of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Coarse phase.
    pub phase: Phase,
    /// Current handle, if any.
    pub connection: Option<ConnectionId>,
    /// Reconnect attempt counter.
    pub attempts: u32,
    /// Registered listeners.
    pub listeners: usize,
    /// Whether a reconnect timer is pending.
    pub reconnect_pending: bool,
    /// Whether an idle-close timer is pending.
    pub idle_close_pending: bool,
    /// Whether a manual close is in force.
    pub manual_close: bool,
    /// Whether the last resolution found no endpoint.
    pub disabled: bool,
    /// Activity counters.
    pub stats: ChannelStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Connecting,
    Open,
}

#[derive(Debug, Clone, Copy)]
struct Handle {
    id: ConnectionId,
    state: HandleState,
}

/// The channel state machine.
pub struct ChannelMachine {
    endpoint: EndpointConfig,
    timings: ChannelTimings,
    listeners: ListenerSet,
    handle: Option<Handle>,
    attempts: u32,
    last_attempt: Option<Instant>,
    reconnect_at: Option<Instant>,
    throttle_retry: bool,
    idle_close_at: Option<Instant>,
    manual_close: bool,
    disabled: bool,
    next_connection: u64,
    commands: VecDeque<Command>,
    stats: ChannelStats,
}

impl ChannelMachine {
    /// Create an idle channel.
    #[must_use]
    pub fn new(endpoint: EndpointConfig, timings: ChannelTimings) -> Self {
        Self {
            endpoint,
            timings,
            listeners: ListenerSet::new(),
            handle: None,
            attempts: 0,
            last_attempt: None,
            reconnect_at: None,
            throttle_retry: false,
            idle_close_at: None,
            manual_close: false,
            disabled: false,
            next_connection: 1,
            commands: VecDeque::new(),
            stats: ChannelStats::default(),
        }
    }

    /// Register a listener and make sure a connection exists or is coming.
    ///
    /// A registration cancels a pending idle close and lifts a manual close.
    pub fn add_listener(
        &mut self,
        id: ListenerId,
        listener: Listener,
        now: Instant,
    ) -> ConnectOutcome {
        if !self.listeners.insert(id, listener) {
            warn!(listener = %id, "Listener already registered");
        }
        if self.idle_close_at.take().is_some() {
            debug!(listener = %id, "Idle close cancelled by new listener");
        }
        self.connect(now)
    }

    /// Deregister a listener.
    ///
    /// Returns `true` if it was registered. When the last listener leaves,
    /// the idle-close grace timer starts.
    pub fn remove_listener(&mut self, id: ListenerId, now: Instant) -> bool {
        if !self.listeners.remove(id) {
            return false;
        }
        if self.listeners.is_empty() {
            let delay = self.timings.idle_close;
            self.idle_close_at = now.checked_add(delay);
            if self.idle_close_at.is_some() {
                debug!(delay_ms = delay.as_millis() as u64, "Last listener left, idle close armed");
            } else {
                warn!("Idle close delay out of range, connection kept open");
            }
        }
        true
    }

    /// Explicit connection request.
    ///
    /// Returns the current handle or starts a new attempt, subject to the
    /// throttle. Lifts a manual close.
    pub fn connect(&mut self, now: Instant) -> ConnectOutcome {
        self.manual_close = false;
        self.attempt(now)
    }

    /// Manual shutdown.
    ///
    /// Suppresses auto-reconnection until the next registration or explicit
    /// connect, clears both timers and the attempt counter, and closes the
    /// handle. A handle still connecting is closed once its open or close is
    /// observed.
    pub fn close(&mut self) {
        self.manual_close = true;
        self.reconnect_at = None;
        self.throttle_retry = false;
        self.idle_close_at = None;
        self.attempts = 0;

        match self.handle {
            Some(Handle {
                id,
                state: HandleState::Open,
            }) => {
                info!(connection = %id, "Closing connection");
                self.discard(id);
            }
            Some(Handle {
                id,
                state: HandleState::Connecting,
            }) => {
                debug!(connection = %id, "Close deferred until connection settles");
            }
            None => {}
        }
    }

    /// The transport reported the handle open.
    pub fn on_open(&mut self, id: ConnectionId) {
        let Some(handle) = self.handle.as_mut().filter(|h| h.id == id) else {
            debug!(connection = %id, "Ignoring open for stale connection");
            return;
        };
        handle.state = HandleState::Open;
        self.attempts = 0;
        self.reconnect_at = None;
        self.throttle_retry = false;
        self.stats.connections_opened += 1;

        if self.manual_close || self.listeners.is_empty() {
            info!(
                connection = %id,
                manual_close = self.manual_close,
                "Connection opened with nobody listening, closing"
            );
            self.discard(id);
        } else {
            info!(connection = %id, listeners = self.listeners.len(), "Connection open");
        }
    }

    /// The transport delivered a frame.
    ///
    /// A frame that does not decode is dropped; the connection stays up.
    /// Otherwise the event goes to every listener registered right now, in
    /// registration order.
    pub fn on_message(&mut self, id: ConnectionId, raw: &[u8]) -> Delivery {
        if !self.is_current(id) {
            trace!(connection = %id, "Dropping frame from stale connection");
            return Delivery::Stale;
        }

        let event = match decode(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(connection = %id, error = %e, bytes = raw.len(), "Dropping malformed frame");
                self.stats.decode_errors += 1;
                return Delivery::Dropped;
            }
        };

        let listeners = self.listeners.snapshot();
        for listener in &listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(connection = %id, "Listener panicked while handling event");
            }
        }
        self.stats.events_delivered += listeners.len() as u64;
        trace!(connection = %id, listeners = listeners.len(), "Event delivered");
        Delivery::Delivered(listeners.len())
    }

    /// The transport skipped an inbound message it could not hand over, such
    /// as one over the size limit. The connection stays open.
    pub fn on_dropped_frame(&mut self, id: ConnectionId, reason: &str) -> Delivery {
        if !self.is_current(id) {
            trace!(connection = %id, "Dropping frame from stale connection");
            return Delivery::Stale;
        }
        warn!(connection = %id, reason = %reason, "Dropping unreadable frame");
        self.stats.decode_errors += 1;
        Delivery::Dropped
    }

    /// The transport reported an error. The paired close drives recovery.
    pub fn on_error(&mut self, id: ConnectionId, error: &str) {
        if self.is_current(id) {
            warn!(connection = %id, error = %error, "Transport error");
            self.stats.transport_errors += 1;
        } else {
            debug!(connection = %id, error = %error, "Transport error on stale connection");
        }
    }

    /// The transport reported the handle closed.
    pub fn on_close(&mut self, id: ConnectionId, now: Instant) {
        if !self.is_current(id) {
            debug!(connection = %id, "Ignoring close for stale connection");
            return;
        }
        self.handle = None;

        if self.manual_close {
            self.attempts = 0;
            debug!(connection = %id, "Connection closed after manual close");
        } else if self.listeners.is_empty() {
            debug!(connection = %id, "Connection closed, no listeners left");
        } else {
            info!(connection = %id, "Connection lost");
            self.schedule_reconnect(now);
        }
    }

    /// Fire every timer due at `now`.
    pub fn on_timeout(&mut self, now: Instant) {
        if self.idle_close_at.is_some_and(|at| at <= now) {
            self.idle_close_at = None;
            if self.listeners.is_empty() {
                info!("Idle grace period elapsed, shutting down channel");
                self.close();
            }
        }

        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            if std::mem::take(&mut self.throttle_retry) {
                debug!(attempts = self.attempts, "Throttle window elapsed");
            } else {
                self.attempts = self.attempts.saturating_add(1);
                debug!(attempts = self.attempts, "Reconnect timer fired");
            }
            self.attempt(now);
        }
    }

    /// Earliest pending timer deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.reconnect_at, self.idle_close_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Take the next command for the driver.
    pub fn poll_command(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }

    /// Current handle, if any.
    #[must_use]
    pub fn connection(&self) -> Option<ConnectionId> {
        self.handle.map(|h| h.id)
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// Snapshot of the channel.
    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            phase: self.phase(),
            connection: self.connection(),
            attempts: self.attempts,
            listeners: self.listeners.len(),
            reconnect_pending: self.reconnect_at.is_some(),
            idle_close_pending: self.idle_close_at.is_some(),
            manual_close: self.manual_close,
            disabled: self.disabled,
            stats: self.stats,
        }
    }

    /// Coarse phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self.handle {
            Some(Handle {
                state: HandleState::Open,
                ..
            }) => Phase::Open,
            Some(Handle {
                state: HandleState::Connecting,
                ..
            }) if self.manual_close => Phase::Closing,
            Some(_) => Phase::Connecting,
            None if self.reconnect_at.is_some() => Phase::ReconnectScheduled,
            None => Phase::Idle,
        }
    }

    fn is_current(&self, id: ConnectionId) -> bool {
        self.handle.is_some_and(|h| h.id == id)
    }

    fn attempt(&mut self, now: Instant) -> ConnectOutcome {
        if let Some(handle) = self.handle {
            return ConnectOutcome::Existing(handle.id);
        }

        let resolution = resolve_endpoint(&self.endpoint);
        let Some(endpoint) = resolution.endpoint else {
            if !self.disabled {
                for rejected in &resolution.rejected {
                    debug!(source = %rejected.source, reason = %rejected.reason, "Endpoint candidate rejected");
                }
                warn!("No usable realtime endpoint configured, realtime events disabled");
                self.disabled = true;
            }
            return ConnectOutcome::Disabled;
        };
        self.disabled = false;

        if let Some(last) = self.last_attempt {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.timings.throttle {
                self.stats.attempts_throttled += 1;
                debug!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Connection attempt throttled"
                );
                if let Some(at) = last.checked_add(self.timings.throttle) {
                    self.defer_until(at);
                }
                return ConnectOutcome::Throttled;
            }
        }

        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        self.last_attempt = Some(now);
        self.handle = Some(Handle {
            id,
            state: HandleState::Connecting,
        });
        self.stats.attempts_started += 1;
        info!(connection = %id, url = %endpoint.url, source = %endpoint.source, "Connecting");
        self.commands.push_back(Command::Connect {
            id,
            url: endpoint.url,
        });
        ConnectOutcome::Started(id)
    }

    /// A throttled attempt with listeners waiting and nothing else pending
    /// is retried when the throttle window ends. The retry does not count as
    /// a reconnect attempt.
    fn defer_until(&mut self, at: Instant) {
        if self.handle.is_none()
            && !self.manual_close
            && self.reconnect_at.is_none()
            && !self.listeners.is_empty()
        {
            debug!("Retrying after throttle window");
            self.reconnect_at = Some(at);
            self.throttle_retry = true;
        }
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        if self.reconnect_at.is_some() {
            return;
        }
        let delay = self.timings.backoff.delay(self.attempts);
        let Some(at) = now.checked_add(delay) else {
            warn!(attempts = self.attempts, "Reconnect delay out of range, not reconnecting");
            return;
        };
        self.reconnect_at = Some(at);
        self.throttle_retry = false;
        self.stats.reconnects_scheduled += 1;
        info!(
            attempts = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
    }

    fn discard(&mut self, id: ConnectionId) {
        self.handle = None;
        self.commands.push_back(Command::Close { id });
    }
}

impl fmt::Debug for ChannelMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelMachine")
            .field("status", &self.status())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}
