//! The channel actor.
//!
//! One task owns the [`ChannelMachine`]. It reacts to three sources, one at
//! a time:
//!
//! ```text
//!   handles ──Request──┐
//!                      ▼
//!   connection ──► ┌────────┐ ──Command::Connect──► spawn connection task
//!   tasks  Event   │ Driver │ ──Command::Close────► signal connection task
//!                  └────────┘
//!                      ▲
//!   sleep_until(next_deadline) ──► on_timeout
//! ```
//!
//! Connection tasks never touch the machine. They report what happened,
//! tagged with their [`ConnectionId`], and the machine ignores reports from
//! handles it has already discarded.

use std::collections::HashMap;
use std::sync::Arc;
use tidings_core::{ChannelMachine, ChannelStats, ChannelStatus, Command, ConnectionId, Listener, ListenerId};
use tidings_transport::{Connector, Frame};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace};
use url::Url;

use crate::metrics;

/// Requests from [`crate::RealtimeChannel`] handles.
pub(crate) enum Request {
    AddListener {
        id: ListenerId,
        listener: Listener,
    },
    RemoveListener {
        id: ListenerId,
    },
    Connect {
        reply: oneshot::Sender<Option<ConnectionId>>,
    },
    Close,
    Status {
        reply: oneshot::Sender<ChannelStatus>,
    },
}

/// Reports from connection tasks.
#[derive(Debug)]
enum Event {
    Opened(ConnectionId),
    Frame(ConnectionId, Frame),
    /// A message the transport skipped; the connection is still usable.
    Skipped(ConnectionId, String),
    Error(ConnectionId, String),
    Closed(ConnectionId),
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

pub(crate) struct Driver {
    machine: ChannelMachine,
    connector: Arc<dyn Connector>,
    requests: mpsc::UnboundedReceiver<Request>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    closers: HashMap<ConnectionId, oneshot::Sender<()>>,
    reported: ChannelStats,
}

impl Driver {
    pub(crate) fn new(
        machine: ChannelMachine,
        connector: Arc<dyn Connector>,
        requests: mpsc::UnboundedReceiver<Request>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            machine,
            connector,
            requests,
            events_tx,
            events_rx,
            closers: HashMap::new(),
            reported: ChannelStats::default(),
        }
    }

    /// Run until every handle is gone.
    pub(crate) async fn run(mut self) {
        debug!(connector = self.connector.name(), "Channel driver started");

        loop {
            let deadline = self.machine.next_deadline().map(Instant::from_std);
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;

                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                () = timer => self.machine.on_timeout(now()),
            }

            self.flush();
        }

        self.machine.close();
        self.flush();
        debug!("Channel driver stopped");
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::AddListener { id, listener } => {
                self.machine.add_listener(id, listener, now());
            }
            Request::RemoveListener { id } => {
                self.machine.remove_listener(id, now());
            }
            Request::Connect { reply } => {
                let outcome = self.machine.connect(now());
                let _ = reply.send(outcome.connection());
            }
            Request::Close => self.machine.close(),
            Request::Status { reply } => {
                let _ = reply.send(self.machine.status());
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        trace!(?event, "Transport event");
        match event {
            Event::Opened(id) => self.machine.on_open(id),
            Event::Frame(id, frame) => {
                self.machine.on_message(id, frame.as_bytes());
            }
            Event::Skipped(id, reason) => {
                self.machine.on_dropped_frame(id, &reason);
            }
            Event::Error(id, error) => self.machine.on_error(id, &error),
            Event::Closed(id) => {
                self.closers.remove(&id);
                self.machine.on_close(id, now());
            }
        }
    }

    /// Carry out queued commands and publish metrics.
    fn flush(&mut self) {
        while let Some(command) = self.machine.poll_command() {
            match command {
                Command::Connect { id, url } => self.spawn_connection(id, url),
                Command::Close { id } => {
                    if let Some(close) = self.closers.remove(&id) {
                        let _ = close.send(());
                    }
                }
            }
        }

        let stats = self.machine.stats();
        if stats != self.reported {
            metrics::record_stats(&self.reported, &stats);
            self.reported = stats;
        }
        metrics::set_listeners(self.machine.listener_count());
    }

    fn spawn_connection(&mut self, id: ConnectionId, url: Url) {
        let (close_tx, close_rx) = oneshot::channel();
        self.closers.insert(id, close_tx);
        tokio::spawn(run_connection(
            id,
            url,
            Arc::clone(&self.connector),
            self.events_tx.clone(),
            close_rx,
        ));
    }
}

/// Drive one connection from handshake to close.
///
/// Always ends by reporting [`Event::Closed`], so the machine sees a close
/// for every connection it asked for. A signal on `close_rx`, or the driver
/// going away, closes the connection.
async fn run_connection(
    id: ConnectionId,
    url: Url,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<Event>,
    mut close_rx: oneshot::Receiver<()>,
) {
    let mut conn = tokio::select! {
        result = connector.connect(&url) => match result {
            Ok(conn) => conn,
            Err(e) => {
                let _ = events.send(Event::Error(id, e.to_string()));
                let _ = events.send(Event::Closed(id));
                return;
            }
        },
        _ = &mut close_rx => {
            let _ = events.send(Event::Closed(id));
            return;
        }
    };

    if events.send(Event::Opened(id)).is_err() {
        let _ = conn.close().await;
        return;
    }

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                if let Err(e) = conn.close().await {
                    debug!(connection = %id, error = %e, "Close handshake failed");
                }
                break;
            }
            received = conn.recv() => match received {
                Ok(Some(frame)) => {
                    if events.send(Event::Frame(id, frame)).is_err() {
                        let _ = conn.close().await;
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) if !e.is_fatal() => {
                    if events.send(Event::Skipped(id, e.to_string())).is_err() {
                        let _ = conn.close().await;
                        break;
                    }
                }
                Err(e) => {
                    let _ = events.send(Event::Error(id, e.to_string()));
                    break;
                }
            },
        }
    }

    let _ = events.send(Event::Closed(id));
}
