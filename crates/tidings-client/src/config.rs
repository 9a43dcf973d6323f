//! Channel configuration.
//!
//! Every field has a default, and the endpoint defaults read the
//! environment:
//!
//! | Variable               | Field                    |
//! |------------------------|--------------------------|
//! | `TIDINGS_STREAM_URL`   | `endpoint.stream_url`    |
//! | `TIDINGS_API_URL`      | `endpoint.api_base_url`  |
//! | `TIDINGS_ORIGIN`       | `endpoint.page_origin`   |
//! | `TIDINGS_STREAM_PATH`  | `endpoint.stream_path`   |
//! | `TIDINGS_TUNNEL_HOSTS` | added to `endpoint.tunnel_hosts` |
//!
//! Blank variables count as unset.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tidings_core::backoff::{DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP};
use tidings_core::endpoint::{DEFAULT_STREAM_PATH, DEFAULT_TUNNEL_SUFFIXES};
use tidings_core::machine::{DEFAULT_IDLE_CLOSE, DEFAULT_THROTTLE};
use tidings_core::{Backoff, ChannelTimings, EndpointConfig};

/// Channel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Endpoint sources.
    #[serde(default)]
    pub endpoint: EndpointSettings,

    /// Timers.
    #[serde(default)]
    pub timing: TimingSettings,

    /// Transport limits.
    #[serde(default)]
    pub transport: TransportSettings,
}

/// Endpoint sources, see [`EndpointConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// Explicit streaming URL.
    #[serde(default = "default_stream_url")]
    pub stream_url: Option<String>,

    /// API base URL to derive the streaming URL from.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: Option<String>,

    /// Origin the application is served from.
    #[serde(default = "default_page_origin")]
    pub page_origin: Option<String>,

    /// Streaming path on a derived origin.
    #[serde(default = "default_stream_path")]
    pub stream_path: String,

    /// Host suffixes treated as developer tunnels.
    #[serde(default = "default_tunnel_hosts")]
    pub tunnel_hosts: Vec<String>,
}

/// Timer settings, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Minimum spacing between connection attempts.
    #[serde(default = "default_throttle")]
    pub throttle_ms: u64,

    /// Grace period before an unused connection is closed.
    #[serde(default = "default_idle_close")]
    pub idle_close_ms: u64,

    /// First reconnect delay.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Reconnect delay ceiling.
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_ms: u64,
}

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Handshake timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// Default value functions
fn default_stream_url() -> Option<String> {
    env_var("TIDINGS_STREAM_URL")
}

fn default_api_base_url() -> Option<String> {
    env_var("TIDINGS_API_URL")
}

fn default_page_origin() -> Option<String> {
    env_var("TIDINGS_ORIGIN")
}

fn default_stream_path() -> String {
    env_var("TIDINGS_STREAM_PATH").unwrap_or_else(|| DEFAULT_STREAM_PATH.to_string())
}

fn default_tunnel_hosts() -> Vec<String> {
    let mut hosts: Vec<String> = DEFAULT_TUNNEL_SUFFIXES
        .iter()
        .map(|s| (*s).to_string())
        .collect();
    if let Some(extra) = env_var("TIDINGS_TUNNEL_HOSTS") {
        hosts.extend(parse_host_list(&extra));
    }
    hosts
}

fn parse_host_list(list: &str) -> impl Iterator<Item = String> + '_ {
    list.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(|h| h.trim_start_matches('.').to_ascii_lowercase())
}

fn as_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn default_throttle() -> u64 {
    as_millis(DEFAULT_THROTTLE)
}

fn default_idle_close() -> u64 {
    as_millis(DEFAULT_IDLE_CLOSE)
}

fn default_backoff_base() -> u64 {
    as_millis(DEFAULT_BACKOFF_BASE)
}

fn default_backoff_cap() -> u64 {
    as_millis(DEFAULT_BACKOFF_CAP)
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_connect_timeout() -> u64 {
    10_000
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            stream_url: default_stream_url(),
            api_base_url: default_api_base_url(),
            page_origin: default_page_origin(),
            stream_path: default_stream_path(),
            tunnel_hosts: default_tunnel_hosts(),
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle(),
            idle_close_ms: default_idle_close(),
            backoff_base_ms: default_backoff_base(),
            backoff_cap_ms: default_backoff_cap(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl ChannelConfig {
    /// Defaults with environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Endpoint resolution inputs.
    #[must_use]
    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            stream_url: self.endpoint.stream_url.clone(),
            api_base_url: self.endpoint.api_base_url.clone(),
            page_origin: self.endpoint.page_origin.clone(),
            stream_path: self.endpoint.stream_path.clone(),
            tunnel_hosts: self.endpoint.tunnel_hosts.clone(),
        }
    }

    /// Machine timings.
    #[must_use]
    pub fn timings(&self) -> ChannelTimings {
        ChannelTimings {
            throttle: Duration::from_millis(self.timing.throttle_ms),
            idle_close: Duration::from_millis(self.timing.idle_close_ms),
            backoff: Backoff::new(
                Duration::from_millis(self.timing.backoff_base_ms),
                Duration::from_millis(self.timing.backoff_cap_ms),
            ),
        }
    }

    /// WebSocket connector settings.
    #[must_use]
    pub fn websocket_config(&self) -> tidings_transport::WebSocketConfig {
        tidings_transport::WebSocketConfig {
            max_message_size: self.transport.max_message_size,
            connect_timeout: Duration::from_millis(self.transport.connect_timeout_ms),
        }
    }
}
