//! End-to-end tests: a real server on loopback, real clients.

use std::time::Duration;

use duelforge::prelude::*;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

// =========================================================================
// Helpers
// =========================================================================

/// Short timings so a whole match takes about a second.
fn fast_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".into(),
        matches: MatchConfig {
            start_delay: Duration::from_millis(50),
            countdown: Duration::from_millis(100),
            round_timeout: Duration::from_secs(2),
            next_round_delay: Duration::from_millis(50),
            return_delay: Duration::from_millis(100),
            ..MatchConfig::default()
        },
        ..ServerConfig::default()
    }
}

struct Running {
    addr: String,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), DuelError>>,
}

async fn start_server() -> Running {
    let server = ServerBuilder::new()
        .config(fast_config())
        .build(BincodeCodec)
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("local addr").to_string();

    let (stop, stopped) = oneshot::channel();
    let handle = tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));
    Running { addr, stop, handle }
}

struct Client {
    channel: MessageChannel<BincodeCodec>,
}

impl Client {
    async fn connect(addr: &str) -> Self {
        let conn = TcpConnection::connect(addr).await.expect("connect");
        Self {
            channel: MessageChannel::open(conn, BincodeCodec, ChannelConfig::default()),
        }
    }

    /// Connects, identifies and waits until the lobby has been joined.
    async fn login(addr: &str, name: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client
            .expect(|m| *m == ServerMessage::RoomJoined { room: RoomKind::Login })
            .await;
        client.send(ClientMessage::Identify { name: name.into() });
        let result = client
            .expect(|m| matches!(m, ServerMessage::IdentifyResult { .. }))
            .await;
        assert_eq!(
            result,
            ServerMessage::IdentifyResult {
                outcome: IdentifyOutcome::Accepted { name: name.into() }
            }
        );
        client
            .expect(|m| *m == ServerMessage::RoomJoined { room: RoomKind::Lobby })
            .await;
        client
    }

    fn send(&self, message: ClientMessage) {
        assert!(self.channel.send(&message), "send failed");
    }

    /// Next non-heartbeat message. Heartbeats are acknowledged.
    async fn next(&mut self) -> ServerMessage {
        loop {
            let message: ServerMessage = timeout(WAIT, self.channel.receive())
                .await
                .expect("timed out waiting for server")
                .expect("channel error");
            if message == ServerMessage::Heartbeat {
                self.send(ClientMessage::HeartbeatAck);
                continue;
            }
            return message;
        }
    }

    /// Skips messages until one matches.
    async fn expect(&mut self, pred: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
        loop {
            let message = self.next().await;
            if pred(&message) {
                return message;
            }
        }
    }
}

/// Waits for a round to go live and clicks its target.
async fn win_round(winner: &mut Client) -> u8 {
    let ServerMessage::RoundStart {
        round,
        positions,
        target_shape,
        countdown_ms,
    } = winner
        .expect(|m| matches!(m, ServerMessage::RoundStart { .. }))
        .await
    else {
        unreachable!();
    };
    assert_ne!(positions[0], positions[1]);
    assert!((1..=2).contains(&target_shape));

    tokio::time::sleep(Duration::from_millis(countdown_ms + 200)).await;
    winner.send(ClientMessage::Click {
        cell: positions[usize::from(target_shape - 1)],
    });
    round
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_identify_moves_client_to_lobby() {
    let server = start_server().await;
    let mut ada = Client::login(&server.addr, "ada").await;

    let update = ada
        .expect(|m| matches!(m, ServerMessage::LobbyUpdate { .. }))
        .await;
    assert_eq!(
        update,
        ServerMessage::LobbyUpdate {
            member_count: 1,
            ready_count: 0,
            names: vec!["ada".into()],
        }
    );
}

#[tokio::test]
async fn test_duplicate_name_keeps_connection_open() {
    let server = start_server().await;
    let _ada = Client::login(&server.addr, "ada").await;

    let mut other = Client::connect(&server.addr).await;
    other
        .expect(|m| *m == ServerMessage::RoomJoined { room: RoomKind::Login })
        .await;
    other.send(ClientMessage::Identify { name: "ADA".into() });
    assert_eq!(
        other.next().await,
        ServerMessage::IdentifyResult {
            outcome: IdentifyOutcome::DuplicateName
        }
    );

    other.send(ClientMessage::Identify { name: "bob".into() });
    assert_eq!(
        other.next().await,
        ServerMessage::IdentifyResult {
            outcome: IdentifyOutcome::Accepted { name: "bob".into() }
        }
    );
}

#[tokio::test]
async fn test_lobby_chat_reaches_everyone() {
    let server = start_server().await;
    let mut ada = Client::login(&server.addr, "ada").await;
    let mut bob = Client::login(&server.addr, "bob").await;

    ada.send(ClientMessage::Chat { text: "hello".into() });
    let expected = ServerMessage::Chat {
        from: "ada".into(),
        text: "hello".into(),
    };
    assert_eq!(
        bob.expect(|m| matches!(m, ServerMessage::Chat { .. })).await,
        expected
    );
    assert_eq!(
        ada.expect(|m| matches!(m, ServerMessage::Chat { .. })).await,
        expected
    );
}

#[tokio::test]
async fn test_full_match_over_tcp() {
    let server = start_server().await;
    let mut watcher = Client::login(&server.addr, "watcher").await;
    let mut ada = Client::login(&server.addr, "ada").await;
    let mut bob = Client::login(&server.addr, "bob").await;

    ada.send(ClientMessage::SetReady { ready: true });
    bob.send(ClientMessage::SetReady { ready: true });

    for player in [&mut ada, &mut bob] {
        player
            .expect(|m| *m == ServerMessage::RoomJoined { room: RoomKind::Match })
            .await;
    }
    let names = vec!["ada".to_string(), "bob".to_string()];
    assert_eq!(
        ada.expect(|m| matches!(m, ServerMessage::MatchStart { .. })).await,
        ServerMessage::MatchStart {
            names: names.clone(),
            your_slot: 1,
        }
    );
    assert_eq!(
        bob.expect(|m| matches!(m, ServerMessage::MatchStart { .. })).await,
        ServerMessage::MatchStart {
            names,
            your_slot: 2,
        }
    );

    for expected_round in 1..=2u8 {
        let round = win_round(&mut ada).await;
        assert_eq!(round, expected_round);
        let result = bob
            .expect(|m| matches!(m, ServerMessage::RoundResult { .. }))
            .await;
        let ServerMessage::RoundResult {
            winner,
            scores,
            game_over,
            outcome,
            ..
        } = result
        else {
            unreachable!();
        };
        assert_eq!(winner, Some(1));
        assert_eq!(scores, [expected_round, 0]);
        assert_eq!(game_over, expected_round == 2);
        if game_over {
            assert_eq!(outcome, Some(MatchOutcome::Winner(1)));
        }
    }

    assert_eq!(
        watcher
            .expect(|m| matches!(m, ServerMessage::GameOver { .. }))
            .await,
        ServerMessage::GameOver {
            summary: "ada beat bob 2-0".into()
        }
    );

    for player in [&mut ada, &mut bob] {
        player
            .expect(|m| *m == ServerMessage::ReturningToLobby)
            .await;
        player
            .expect(|m| *m == ServerMessage::RoomJoined { room: RoomKind::Lobby })
            .await;
    }
}

#[tokio::test]
async fn test_disconnect_mid_match_notifies_opponent() {
    let server = start_server().await;
    let ada = Client::login(&server.addr, "ada").await;
    let mut bob = Client::login(&server.addr, "bob").await;

    ada.send(ClientMessage::SetReady { ready: true });
    bob.send(ClientMessage::SetReady { ready: true });
    bob.expect(|m| matches!(m, ServerMessage::MatchStart { .. }))
        .await;

    drop(ada);

    assert_eq!(
        bob.expect(|m| matches!(m, ServerMessage::PlayerLeft { .. }))
            .await,
        ServerMessage::PlayerLeft {
            name: "ada".into(),
            reason: LeaveReason::Disconnected,
            winner: 2,
        }
    );
    assert_eq!(
        bob.expect(|m| matches!(m, ServerMessage::GameOver { .. })).await,
        ServerMessage::GameOver {
            summary: "bob wins, ada disconnected".into()
        }
    );
    bob.expect(|m| *m == ServerMessage::RoomJoined { room: RoomKind::Lobby })
        .await;
}

#[tokio::test]
async fn test_undecodable_frame_closes_connection() {
    let server = start_server().await;
    let conn = TcpConnection::connect(server.addr.as_str())
        .await
        .expect("connect");

    let first = timeout(WAIT, conn.recv()).await.expect("timed out");
    assert!(matches!(first, Ok(Some(_))));

    conn.send(&[0xff, 0xff, 0xff]).await.expect("send");

    let closed = timeout(WAIT, async {
        loop {
            match conn.recv().await {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server should close the connection");
}

#[tokio::test]
async fn test_run_until_returns_on_shutdown() {
    let server = start_server().await;
    let _ada = Client::login(&server.addr, "ada").await;

    server.stop.send(()).expect("server still running");
    let result = timeout(WAIT, server.handle)
        .await
        .expect("server did not stop")
        .expect("server task panicked");
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_catch_up_policy_from_config_serves_clients() {
    let mut config = fast_config();
    config.tick.policy = TickPolicy::CatchUp;
    config.max_messages_per_tick = 1;
    let server = ServerBuilder::new()
        .config(config)
        .build(BincodeCodec)
        .await
        .expect("server should build");
    assert_eq!(server.config().tick.policy, TickPolicy::CatchUp);
    let addr = server.local_addr().expect("local addr").to_string();
    tokio::spawn(server.run());

    let mut ada = Client::login(&addr, "ada").await;
    for n in 0..5 {
        ada.send(ClientMessage::Chat { text: format!("line {n}") });
    }
    let last = ada
        .expect(|m| matches!(m, ServerMessage::Chat { text, .. } if text == "line 4"))
        .await;
    assert_eq!(
        last,
        ServerMessage::Chat {
            from: "ada".into(),
            text: "line 4".into()
        }
    );
}

#[tokio::test]
async fn test_websocket_transport_with_json_codec() {
    let server = ServerBuilder::new()
        .config(fast_config())
        .build_websocket(JsonCodec)
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("local addr");
    tokio::spawn(server.run());

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");

    async fn next_message(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> ServerMessage {
        loop {
            let frame = timeout(WAIT, ws.next())
                .await
                .expect("timed out")
                .expect("stream ended")
                .expect("ws error");
            if let Message::Binary(data) = frame {
                return JsonCodec.decode(&data).expect("json server message");
            }
        }
    }

    assert_eq!(
        next_message(&mut ws).await,
        ServerMessage::RoomJoined { room: RoomKind::Login }
    );

    let identify = JsonCodec
        .encode(&ClientMessage::Identify { name: "ada".into() })
        .expect("encode");
    ws.send(Message::Binary(identify.into())).await.expect("send");

    assert_eq!(
        next_message(&mut ws).await,
        ServerMessage::IdentifyResult {
            outcome: IdentifyOutcome::Accepted { name: "ada".into() }
        }
    );
}
