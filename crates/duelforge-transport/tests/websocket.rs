//! WebSocket transport against a `tokio-tungstenite` client.

#![cfg(feature = "websocket")]

use std::sync::Arc;
use std::time::Duration;

use duelforge_transport::{Connection, Transport, TransportError, WebSocketConnection, WebSocketTransport};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Binds, connects one client and returns both ends.
async fn pair() -> (WebSocketConnection, Client) {
    let mut transport = WebSocketTransport::bind("127.0.0.1:0").await.expect("bind");
    let addr = transport.local_addr().expect("local addr");
    let server = tokio::spawn(async move { transport.accept().await });
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("client connects");
    let conn = server.await.expect("accept task").expect("accept");
    (conn, client)
}

#[tokio::test]
async fn test_binary_frames_both_ways() {
    let (conn, mut client) = pair().await;

    conn.send(b"round 1").await.expect("send");
    let got = client.next().await.expect("open").expect("frame");
    assert_eq!(got, Message::Binary(b"round 1".to_vec().into()));

    client
        .send(Message::Binary(vec![1, 2, 3].into()))
        .await
        .expect("client send");
    assert_eq!(conn.recv().await.expect("recv"), Some(vec![1, 2, 3]));
}

#[tokio::test]
async fn test_empty_message_is_delivered_as_probe() {
    let (conn, mut client) = pair().await;

    client
        .send(Message::Binary(Vec::new().into()))
        .await
        .expect("client send");
    assert_eq!(conn.recv().await.expect("recv"), Some(Vec::new()));

    conn.send(&[]).await.expect("send probe");
    let got = client.next().await.expect("open").expect("frame");
    assert!(got.into_data().is_empty());
}

#[tokio::test]
async fn test_text_message_arrives_as_bytes_and_pings_are_skipped() {
    let (conn, mut client) = pair().await;

    client.send(Message::Ping(Vec::new().into())).await.expect("ping");
    client.send(Message::Text("{\"Chat\":{}}".into())).await.expect("text");
    assert_eq!(
        conn.recv().await.expect("recv"),
        Some(b"{\"Chat\":{}}".to_vec())
    );
}

#[tokio::test]
async fn test_send_not_blocked_by_pending_recv() {
    let (conn, mut client) = pair().await;
    let conn = Arc::new(conn);

    let reader = Arc::clone(&conn);
    let pending = tokio::spawn(async move { reader.recv().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(1), conn.send(b"heartbeat"))
        .await
        .expect("send finished while recv was parked")
        .expect("send");
    assert!(client.next().await.is_some());

    client.close(None).await.expect("client close");
    assert_eq!(pending.await.expect("reader task").expect("recv"), None);
}

#[tokio::test]
async fn test_close_ends_the_client_stream() {
    let (conn, mut client) = pair().await;
    conn.close().await.expect("close");

    loop {
        match client.next().await {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => continue,
        }
    }
}

#[tokio::test]
async fn test_stalled_handshake_is_abandoned() {
    let mut transport = WebSocketTransport::bind("127.0.0.1:0")
        .await
        .expect("bind")
        .with_handshake_timeout(Duration::from_millis(100));
    let addr = transport.local_addr().expect("local addr");

    // Connects but never sends the upgrade request.
    let _silent = TcpStream::connect(addr).await.expect("tcp connect");

    let result = tokio::time::timeout(Duration::from_secs(2), transport.accept())
        .await
        .expect("accept gave up on its own");
    assert!(matches!(result, Err(TransportError::AcceptFailed(_))));
}
