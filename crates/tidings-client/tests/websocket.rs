use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tidings_client::{ChannelConfig, Phase, RealtimeChannel};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[tokio::test]
async fn test_events_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text(r#"{"type":"approval.updated","id":1}"#.into()))
            .await
            .unwrap();
        ws.send(Message::Text("garbage".into())).await.unwrap();
        ws.send(Message::Text(r#"{"type":"approval.updated","id":2}"#.into()))
            .await
            .unwrap();
        // Hold the connection until the client goes away.
        while let Some(Ok(_)) = ws.next().await {}
        let _ = done_tx.send(());
    });

    let mut config = ChannelConfig::default();
    config.endpoint.stream_url = Some(format!("ws://{addr}/ws"));
    config.endpoint.api_base_url = None;
    config.endpoint.page_origin = Some("http://127.0.0.1:5173".into());
    let channel = RealtimeChannel::new(&config);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = channel.add_listener(move |event| {
        let _ = tx.send(event["id"].as_i64());
    });

    let wait = Duration::from_secs(5);
    assert_eq!(timeout(wait, rx.recv()).await.unwrap(), Some(Some(1)));
    assert_eq!(timeout(wait, rx.recv()).await.unwrap(), Some(Some(2)));

    let status = channel.status().await.unwrap();
    assert_eq!(status.phase, Phase::Open);
    assert_eq!(status.stats.decode_errors, 1);

    channel.close_connection();
    assert!(timeout(wait, done_rx.recv()).await.unwrap().is_some());
    drop(sub);
}

#[tokio::test]
async fn test_oversized_message_keeps_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let big = format!(r#"{{"id":0,"pad":"{}"}}"#, "x".repeat(2048));
        ws.send(Message::Text(big)).await.unwrap();
        ws.send(Message::Text(r#"{"id":3}"#.into())).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let mut config = ChannelConfig::default();
    config.endpoint.stream_url = Some(format!("ws://{addr}/ws"));
    config.endpoint.api_base_url = None;
    config.transport.max_message_size = 1024;
    let channel = RealtimeChannel::new(&config);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = channel.add_listener(move |event| {
        let _ = tx.send(event["id"].as_i64());
    });

    let wait = Duration::from_secs(5);
    assert_eq!(timeout(wait, rx.recv()).await.unwrap(), Some(Some(3)));

    let status = channel.status().await.unwrap();
    assert_eq!(status.phase, Phase::Open);
    assert_eq!(status.stats.decode_errors, 1);
    assert_eq!(status.stats.attempts_started, 1);
}
