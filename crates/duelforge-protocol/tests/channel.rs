//! Message channels over real loopback TCP connections.

use std::time::Duration;

use duelforge_protocol::{
    BincodeCodec, ChannelConfig, ChannelError, ClientMessage, Codec,
    IdentifyOutcome, MessageChannel, ServerMessage,
};
use duelforge_transport::{Connection, TcpConnection, TcpTransport, Transport};

async fn pair() -> (TcpConnection, TcpConnection) {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.expect("bind");
    let addr = transport.local_addr().expect("local addr");
    let accept = tokio::spawn(async move { transport.accept().await.expect("accept") });
    let client = TcpConnection::connect(addr).await.expect("connect");
    let server = accept.await.expect("accept task");
    (server, client)
}

fn channel(conn: TcpConnection) -> MessageChannel<BincodeCodec> {
    MessageChannel::open(conn, BincodeCodec, ChannelConfig::default())
}

async fn wait_pending(ch: &mut MessageChannel<BincodeCodec>) {
    for _ in 0..200 {
        if ch.has_pending() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no frame arrived");
}

#[tokio::test]
async fn test_typed_messages_flow_both_ways() {
    let (server, client) = pair().await;
    let mut server = channel(server);
    let mut client = channel(client);

    assert!(client.send(&ClientMessage::Identify { name: "ada".into() }));
    let got: ClientMessage = server.receive().await.expect("receive");
    assert_eq!(got, ClientMessage::Identify { name: "ada".into() });

    let reply = ServerMessage::IdentifyResult {
        outcome: IdentifyOutcome::Accepted { name: "ada".into() },
    };
    assert!(server.send(&reply));
    let got: ServerMessage = client.receive().await.expect("receive");
    assert_eq!(got, reply);
}

#[tokio::test]
async fn test_has_pending_reports_only_complete_frames() {
    let (server, client) = pair().await;
    let mut server = channel(server);
    let client = channel(client);

    assert!(!server.has_pending());
    assert!(client.send(&ClientMessage::SetReady { ready: true }));
    wait_pending(&mut server).await;

    let got = server.try_receive::<ClientMessage>().expect("frame").expect("decode");
    assert_eq!(got, ClientMessage::SetReady { ready: true });
    assert!(!server.has_pending());
}

#[tokio::test]
async fn test_frames_keep_their_order() {
    let (server, client) = pair().await;
    let mut server = channel(server);
    let client = channel(client);

    for cell in 0..5 {
        assert!(client.send(&ClientMessage::Click { cell }));
    }
    for cell in 0..5 {
        let got: ClientMessage = server.receive().await.expect("receive");
        assert_eq!(got, ClientMessage::Click { cell });
    }
}

#[tokio::test]
async fn test_raw_probe_is_swallowed_by_receiver() {
    let (server, raw_client) = pair().await;
    let mut server = channel(server);

    raw_client.send(&[]).await.expect("probe");
    let bytes = BincodeCodec.encode(&ClientMessage::HeartbeatAck).expect("encode");
    raw_client.send(&bytes).await.expect("send");

    let got: ClientMessage = server.receive().await.expect("receive");
    assert_eq!(got, ClientMessage::HeartbeatAck);
}

#[tokio::test]
async fn test_idle_channel_probes_peer() {
    let (server, raw_client) = pair().await;
    let mut server = MessageChannel::open(
        server,
        BincodeCodec,
        ChannelConfig {
            stale_after: Duration::from_millis(30),
            ..ChannelConfig::default()
        },
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.is_live());

    let probe = tokio::time::timeout(Duration::from_secs(2), raw_client.recv())
        .await
        .expect("probe should arrive")
        .expect("recv")
        .expect("frame");
    assert!(probe.is_empty());
}

#[tokio::test]
async fn test_peer_close_makes_channel_dead() {
    let (server, client) = pair().await;
    let mut server = channel(server);
    let mut client = channel(client);

    assert!(server.is_live());
    client.close();

    let result = server.receive::<ClientMessage>().await;
    assert!(matches!(result, Err(ChannelError::Closed)));
    assert!(!server.is_live());
}

#[tokio::test]
async fn test_wrong_message_kind_is_protocol_fault() {
    let (server, client) = pair().await;
    let mut server = channel(server);
    let client = channel(client);

    // Server Chat shares its tag with client HeartbeatAck, which has no
    // body, so the two strings are trailing bytes.
    assert!(client.send(&ServerMessage::Chat {
        from: "x".into(),
        text: "y".into(),
    }));
    let result = server.receive::<ClientMessage>().await;
    assert!(matches!(result, Err(ChannelError::Protocol(_))));
    assert!(server.is_faulted());
    assert!(!server.send(&ServerMessage::Heartbeat));
}
