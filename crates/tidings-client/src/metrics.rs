//! Channel metrics.
//!
//! Uses the `metrics` facade. Nothing is exported unless the application
//! installs a recorder (the `tidings` binary can install a Prometheus one).

use metrics::{counter, gauge};
use tidings_core::ChannelStats;
use tracing::debug;

/// Metric names.
pub mod names {
    pub const CONNECT_ATTEMPTS_TOTAL: &str = "tidings_connect_attempts_total";
    pub const CONNECT_THROTTLED_TOTAL: &str = "tidings_connect_throttled_total";
    pub const CONNECTIONS_OPENED_TOTAL: &str = "tidings_connections_opened_total";
    pub const RECONNECTS_SCHEDULED_TOTAL: &str = "tidings_reconnects_scheduled_total";
    pub const EVENTS_DELIVERED_TOTAL: &str = "tidings_events_delivered_total";
    pub const DECODE_ERRORS_TOTAL: &str = "tidings_decode_errors_total";
    pub const TRANSPORT_ERRORS_TOTAL: &str = "tidings_transport_errors_total";
    pub const LISTENERS_ACTIVE: &str = "tidings_listeners_active";
}

/// Describe all channel metrics to the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        names::CONNECT_ATTEMPTS_TOTAL,
        "Connection attempts started"
    );
    metrics::describe_counter!(
        names::CONNECT_THROTTLED_TOTAL,
        "Connection attempts suppressed by the throttle window"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_OPENED_TOTAL,
        "Connections that completed their handshake"
    );
    metrics::describe_counter!(
        names::RECONNECTS_SCHEDULED_TOTAL,
        "Reconnects scheduled after an unexpected close"
    );
    metrics::describe_counter!(
        names::EVENTS_DELIVERED_TOTAL,
        "Decoded events dispatched to listeners"
    );
    metrics::describe_counter!(names::DECODE_ERRORS_TOTAL, "Frames dropped as malformed");
    metrics::describe_counter!(names::TRANSPORT_ERRORS_TOTAL, "Transport errors reported");
    metrics::describe_gauge!(names::LISTENERS_ACTIVE, "Currently registered listeners");

    debug!("Channel metrics described");
}

/// Record the counter growth between two stats snapshots.
pub fn record_stats(prev: &ChannelStats, now: &ChannelStats) {
    let deltas = [
        (names::CONNECT_ATTEMPTS_TOTAL, prev.attempts_started, now.attempts_started),
        (names::CONNECT_THROTTLED_TOTAL, prev.attempts_throttled, now.attempts_throttled),
        (names::CONNECTIONS_OPENED_TOTAL, prev.connections_opened, now.connections_opened),
        (names::RECONNECTS_SCHEDULED_TOTAL, prev.reconnects_scheduled, now.reconnects_scheduled),
        (names::EVENTS_DELIVERED_TOTAL, prev.events_delivered, now.events_delivered),
        (names::DECODE_ERRORS_TOTAL, prev.decode_errors, now.decode_errors),
        (names::TRANSPORT_ERRORS_TOTAL, prev.transport_errors, now.transport_errors),
    ];
    for (name, before, after) in deltas {
        let delta = after.saturating_sub(before);
        if delta > 0 {
            counter!(name).increment(delta);
        }
    }
}

/// Update the registered listener gauge.
pub fn set_listeners(count: usize) {
    gauge!(names::LISTENERS_ACTIVE).set(count as f64);
}
