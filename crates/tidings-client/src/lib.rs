//! # tidings-client
//!
//! A shared, self-healing realtime event channel.
//!
//! Any number of components register listeners on one channel. The channel
//! opens a single streaming connection while at least one listener is
//! registered, reconnects with exponential backoff when the connection
//! drops, spaces attempts at least five seconds apart, and closes the
//! connection shortly after the last listener leaves.
//!
//! ```rust,ignore
//! let subscription = tidings_client::add_listener(|event| {
//!     println!("{event}");
//! });
//!
//! // later
//! subscription.dispose();
//! ```
//!
//! The process-wide channel from [`shared`] reads its configuration from
//! the environment (see [`config`]). Use [`RealtimeChannel::new`] or
//! [`RealtimeChannel::with_connector`] for explicit configuration.

pub mod channel;
pub mod config;
mod driver;
pub mod metrics;

pub use channel::{RealtimeChannel, Subscription};
pub use config::ChannelConfig;
pub use tidings_core::{ChannelStatus, ConnectionId, Event, ListenerId, Phase};

use std::sync::OnceLock;

static SHARED: OnceLock<RealtimeChannel> = OnceLock::new();

/// The process-wide channel.
///
/// Created on first use from [`ChannelConfig::from_env`] unless
/// [`install_shared`] was called first.
///
/// # Panics
///
/// The first call panics if made outside a Tokio runtime.
pub fn shared() -> &'static RealtimeChannel {
    SHARED.get_or_init(|| RealtimeChannel::new(&ChannelConfig::from_env()))
}

/// Use `channel` as the process-wide channel.
///
/// # Errors
///
/// Returns the channel back if the shared channel already exists.
pub fn install_shared(channel: RealtimeChannel) -> Result<(), RealtimeChannel> {
    SHARED.set(channel)
}

/// Register a listener on the shared channel.
pub fn add_listener<F>(listener: F) -> Subscription
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    shared().add_listener(listener)
}

/// Connect the shared channel.
pub async fn connect() -> Option<ConnectionId> {
    shared().connect().await
}

/// Close the shared channel's connection.
pub fn close_connection() {
    shared().close_connection();
}
