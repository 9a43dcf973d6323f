use std::sync::{Arc, Mutex};
use std::time::Duration;
use tidings_client::{Phase, RealtimeChannel};
use tidings_core::{Backoff, ChannelTimings, EndpointConfig};
use tidings_transport::{MemoryConnector, MemoryServer};
use tokio::time::{sleep, Instant};

fn loopback_endpoint() -> EndpointConfig {
    EndpointConfig::default()
        .with_stream_url("ws://127.0.0.1:8000/ws")
        .with_page_origin("http://127.0.0.1:5173")
}

fn channel_with(timings: ChannelTimings) -> (RealtimeChannel, MemoryServer) {
    let (connector, server) = MemoryConnector::pair();
    let channel =
        RealtimeChannel::with_connector(loopback_endpoint(), timings, Arc::new(connector));
    (channel, server)
}

fn channel() -> (RealtimeChannel, MemoryServer) {
    channel_with(ChannelTimings::default())
}

/// Let every task run to idle.
async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

fn assert_near(actual: Duration, expected_ms: u64) {
    let actual = actual.as_millis() as u64;
    assert!(
        (expected_ms..expected_ms + 5).contains(&actual),
        "expected ~{expected_ms}ms, got {actual}ms"
    );
}

#[tokio::test(start_paused = true)]
async fn test_delivers_in_registration_order() {
    let (channel, mut server) = channel();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let subs: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|name| {
            let seen = Arc::clone(&seen);
            channel.add_listener(move |event| {
                seen.lock().unwrap().push((name, event["n"].as_i64()));
            })
        })
        .collect();

    let remote = server.accept().await.unwrap();
    settle().await;
    assert_eq!(server.attempts(), 1);
    assert_eq!(remote.url().as_str(), "ws://127.0.0.1:8000/ws");

    let status = channel.status().await.unwrap();
    assert_eq!(status.phase, Phase::Open);
    let connection = status.connection;

    remote.push_text("{not json");
    remote.push_text(r#"{"n":1}"#);
    remote.push_binary(br#"{"n":2}"#.to_vec());
    settle().await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![("a", Some(1)), ("b", Some(1)), ("a", Some(2)), ("b", Some(2))]
    );

    let status = channel.status().await.unwrap();
    assert_eq!(status.connection, connection);
    assert_eq!(status.stats.decode_errors, 1);
    assert_eq!(status.stats.events_delivered, 4);
    assert!(!remote.closed_by_client());
    drop(subs);
}

#[tokio::test(start_paused = true)]
async fn test_idle_close_after_grace_period() {
    let (channel, mut server) = channel();
    let sub = channel.add_listener(|_| {});
    let remote = server.accept().await.unwrap();
    settle().await;

    assert!(sub.dispose());
    sleep(Duration::from_millis(700)).await;
    let status = channel.status().await.unwrap();
    assert_eq!(status.phase, Phase::Open);
    assert!(status.idle_close_pending);

    sleep(Duration::from_millis(100)).await;
    let status = channel.status().await.unwrap();
    assert_eq!(status.phase, Phase::Idle);
    assert_eq!(status.connection, None);
    assert!(!status.reconnect_pending);
    assert!(remote.closed_by_client());

    sleep(Duration::from_secs(60)).await;
    assert_eq!(server.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_registration_within_grace_keeps_connection() {
    let (channel, mut server) = channel();
    let first = channel.add_listener(|_| {});
    let remote = server.accept().await.unwrap();
    settle().await;
    let connection = channel.status().await.unwrap().connection;

    drop(first);
    sleep(Duration::from_millis(500)).await;
    let _second = channel.add_listener(|_| {});
    sleep(Duration::from_secs(2)).await;

    let status = channel.status().await.unwrap();
    assert_eq!(status.phase, Phase::Open);
    assert_eq!(status.connection, connection);
    assert!(!status.idle_close_pending);
    assert!(!remote.closed_by_client());
    assert_eq!(server.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_listener_churn_opens_one_connection() {
    let (channel, mut server) = channel();
    for _ in 0..20 {
        let sub = channel.add_listener(|_| {});
        drop(sub);
    }
    let _kept = channel.add_listener(|_| {});

    let _remote = server.accept().await.unwrap();
    sleep(Duration::from_secs(2)).await;

    assert_eq!(server.attempts(), 1);
    assert!(server.try_accept().is_none());
    let status = channel.status().await.unwrap();
    assert_eq!(status.phase, Phase::Open);
    assert_eq!(status.listeners, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_waits_for_throttle_window() {
    let (channel, mut server) = channel();
    let start = Instant::now();
    let _sub = channel.add_listener(|_| {});

    let first = server.accept().await.unwrap();
    settle().await;
    first.close();
    settle().await;

    let status = channel.status().await.unwrap();
    assert_eq!(status.phase, Phase::ReconnectScheduled);
    assert!(status.reconnect_pending);

    // The 1s backoff lands inside the 5s throttle window.
    let second = server.accept().await.unwrap();
    assert_near(start.elapsed(), 5_000);
    settle().await;

    let status = channel.status().await.unwrap();
    assert_eq!(status.phase, Phase::Open);
    assert_eq!(status.attempts, 0);
    assert_eq!(status.stats.attempts_throttled, 1);
    assert_eq!(server.attempts(), 2);
    drop(second);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_then_resets_on_open() {
    let timings = ChannelTimings {
        throttle: Duration::ZERO,
        ..ChannelTimings::default()
    };
    let (channel, mut server) = channel_with(timings);
    server.set_refusing(true);

    let _sub = channel.add_listener(|_| {});
    let mut last = Instant::now();
    server.accept().await.unwrap();

    for expected in [1_000, 2_000, 4_000, 8_000, 15_000, 15_000] {
        server.accept().await.unwrap();
        assert_near(last.elapsed(), expected);
        last = Instant::now();
    }

    server.set_refusing(false);
    let remote = server.accept().await.unwrap();
    assert_near(last.elapsed(), 15_000);
    settle().await;

    let status = channel.status().await.unwrap();
    assert_eq!(status.phase, Phase::Open);
    assert_eq!(status.attempts, 0);

    remote.close();
    settle().await;
    let last = Instant::now();
    let _again = server.accept().await.unwrap();
    assert_near(last.elapsed(), 1_000);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_connect_is_throttled() {
    let (channel, mut server) = channel();
    let _sub = channel.add_listener(|_| {});
    let remote = server.accept().await.unwrap();
    settle().await;

    let current = channel.status().await.unwrap().connection;
    assert!(current.is_some());
    assert_eq!(channel.connect().await, current);

    remote.fail("connection reset");
    settle().await;
    assert_eq!(channel.connect().await, None);

    let status = channel.status().await.unwrap();
    assert_eq!(status.stats.transport_errors, 1);
    assert_eq!(status.stats.attempts_throttled, 1);
    assert_eq!(server.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_connection_cancels_reconnect() {
    let (channel, mut server) = channel();
    let _sub = channel.add_listener(|_| {});
    let remote = server.accept().await.unwrap();
    settle().await;

    remote.close();
    settle().await;
    assert!(channel.status().await.unwrap().reconnect_pending);

    channel.close_connection();
    let status = channel.status().await.unwrap();
    assert!(!status.reconnect_pending);
    assert!(status.manual_close);
    assert_eq!(status.phase, Phase::Idle);
    assert_eq!(status.listeners, 1);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(server.attempts(), 1);

    // A new registration starts over.
    let _again = channel.add_listener(|_| {});
    let _remote = server.accept().await.unwrap();
    settle().await;
    let status = channel.status().await.unwrap();
    assert_eq!(status.phase, Phase::Open);
    assert!(!status.manual_close);
}

#[tokio::test(start_paused = true)]
async fn test_close_connection_closes_open_handle() {
    let (channel, mut server) = channel();
    let _sub = channel.add_listener(|_| {});
    let remote = server.accept().await.unwrap();
    settle().await;

    channel.close_connection();
    settle().await;
    assert!(remote.closed_by_client());

    sleep(Duration::from_secs(30)).await;
    let status = channel.status().await.unwrap();
    assert_eq!(status.phase, Phase::Idle);
    assert_eq!(server.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_while_connecting() {
    let (connector, mut server) = MemoryConnector::manual();
    let channel = RealtimeChannel::with_connector(
        loopback_endpoint(),
        ChannelTimings::default(),
        Arc::new(connector),
    );
    let _sub = channel.add_listener(|_| {});
    let remote = server.accept().await.unwrap();

    channel.close_connection();
    assert_eq!(channel.status().await.unwrap().phase, Phase::Closing);

    remote.accept();
    settle().await;
    assert!(remote.closed_by_client());

    let status = channel.status().await.unwrap();
    assert_eq!(status.phase, Phase::Idle);
    assert!(!status.reconnect_pending);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_removes_only_its_listener() {
    let (channel, mut server) = channel();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let listener = |name: &'static str| {
        let seen = Arc::clone(&seen);
        move |_: &tidings_client::Event| seen.lock().unwrap().push(name)
    };

    let a = channel.add_listener(listener("a"));
    let b = channel.add_listener(listener("b"));
    assert_ne!(a.id(), b.id());
    let remote = server.accept().await.unwrap();
    settle().await;

    assert!(a.dispose());
    assert!(!a.dispose());
    assert!(!a.is_active());
    assert!(b.is_active());

    remote.push_text("{}");
    settle().await;
    assert_eq!(*seen.lock().unwrap(), vec!["b"]);
    assert_eq!(channel.status().await.unwrap().listeners, 1);

    drop(b);
    settle().await;
    let status = channel.status().await.unwrap();
    assert_eq!(status.listeners, 0);
    assert!(status.idle_close_pending);
}

#[tokio::test(start_paused = true)]
async fn test_no_endpoint_disables_channel() {
    let (connector, server) = MemoryConnector::pair();
    let production = EndpointConfig::default()
        .with_stream_url("ws://localhost:8000/ws")
        .with_page_origin("https://app.example.com");
    let channel =
        RealtimeChannel::with_connector(production, ChannelTimings::default(), Arc::new(connector));

    let _sub = channel.add_listener(|_| {});
    assert_eq!(channel.connect().await, None);

    sleep(Duration::from_secs(30)).await;
    let status = channel.status().await.unwrap();
    assert!(status.disabled);
    assert_eq!(status.phase, Phase::Idle);
    assert_eq!(server.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_custom_backoff_policy() {
    let timings = ChannelTimings {
        throttle: Duration::ZERO,
        idle_close: Duration::from_millis(750),
        backoff: Backoff::new(Duration::from_millis(200), Duration::from_millis(500)),
    };
    let (channel, mut server) = channel_with(timings);
    server.set_refusing(true);

    let _sub = channel.add_listener(|_| {});
    let mut last = Instant::now();
    server.accept().await.unwrap();
    for expected in [200, 400, 500] {
        server.accept().await.unwrap();
        assert_near(last.elapsed(), expected);
        last = Instant::now();
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_with_default_timings() {
    let (channel, mut server) = channel();
    server.set_refusing(true);

    let _sub = channel.add_listener(|_| {});
    let mut last = Instant::now();
    server.accept().await.unwrap();

    // Short delays wait out the throttle window without growing the backoff.
    for expected in [5_000, 5_000, 5_000, 8_000, 15_000, 15_000] {
        server.accept().await.unwrap();
        assert_near(last.elapsed(), expected);
        last = Instant::now();
    }
    settle().await;

    let status = channel.status().await.unwrap();
    assert_eq!(status.phase, Phase::ReconnectScheduled);
    assert_eq!(status.stats.attempts_started, 7);
    assert_eq!(status.stats.attempts_throttled, 3);
    assert_eq!(server.attempts(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_frame_is_skipped() {
    let (channel, mut server) = channel();
    server.set_max_message_size(Some(16));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let seen = Arc::clone(&seen);
        channel.add_listener(move |event| seen.lock().unwrap().push(event["n"].as_i64()))
    };

    let remote = server.accept().await.unwrap();
    settle().await;
    remote.push_text(r#"{"padding":"xxxxxxxxxxxxxxxx"}"#);
    remote.push_text(r#"{"n":1}"#);
    settle().await;

    assert_eq!(*seen.lock().unwrap(), vec![Some(1)]);
    let status = channel.status().await.unwrap();
    assert_eq!(status.phase, Phase::Open);
    assert_eq!(status.stats.decode_errors, 1);
    assert_eq!(status.stats.transport_errors, 0);
    assert_eq!(server.attempts(), 1);
    assert!(!remote.closed_by_client());
}
