//! # tidings-core
//!
//! Core types and the connection state machine for the Tidings realtime
//! event channel.
//!
//! This crate performs no I/O and owns no runtime:
//!
//! - **Endpoint** - Pick and vet the streaming URL
//! - **Backoff** - Reconnect delay policy
//! - **Event** - Decode incoming frames
//! - **Listener** - Ordered listener registry
//! - **Machine** - The channel lifecycle, driven by explicit events
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  events   ┌──────────────────┐  dispatch  ┌─────────────┐
//! │  Transport  │──────────▶│  ChannelMachine  │───────────▶│  Listeners  │
//! └─────────────┘           └──────────────────┘            └─────────────┘
//!        ▲                          │
//!        └──── Connect / Close ─────┘
//! ```

pub mod backoff;
pub mod endpoint;
pub mod event;
pub mod listener;
pub mod machine;

pub use backoff::Backoff;
pub use endpoint::{resolve_endpoint, EndpointConfig, EndpointRejection, EndpointSource, Resolution};
pub use event::{DecodeError, Event};
pub use listener::{Listener, ListenerId, ListenerSet};
pub use machine::{
    ChannelMachine, ChannelStats, ChannelStatus, ChannelTimings, Command, ConnectOutcome,
    ConnectionId, Delivery, Phase,
};
