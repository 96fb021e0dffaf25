//! End-to-end tests against a server listening on loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quarry_config::Config;
use quarry_protocol::{
    BlockAction, FrameConfig, FrameError, Orientation, PROTOCOL_VERSION, Packet, PlayerId,
    read_packet, write_packet,
};
use quarry_server::GameServer;
use quarry_world::{Block, BlockPos, ChunkCoord};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> Config {
    let mut config = Config::default();
    config.network.bind_host = "127.0.0.1".to_string();
    config.rules.view_radius = 1;
    config.rules.chunks_per_tick = 27;
    // Lets a test client jump straight into open sky.
    config.rules.max_speed = 5000.0;
    config
}

/// Start a server on an ephemeral port and return the bound address.
async fn start_test_server(config: Config) -> (SocketAddr, Arc<GameServer>) {
    let server = Arc::new(GameServer::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let srv = Arc::clone(&server);
    tokio::spawn(async move {
        srv.run_with_listener(listener).await.unwrap();
    });
    (addr, server)
}

async fn send(stream: &mut TcpStream, packet: Packet) {
    write_packet(stream, &packet, &FrameConfig::default())
        .await
        .unwrap();
}

async fn recv_until(stream: &mut TcpStream, mut wanted: impl FnMut(&Packet) -> bool) -> Packet {
    let frame = FrameConfig::default();
    tokio::time::timeout(WAIT, async {
        loop {
            let packet = read_packet(stream, &frame)
                .await
                .expect("connection ended while waiting");
            if wanted(&packet) {
                return packet;
            }
        }
    })
    .await
    .expect("timed out waiting for packet")
}

/// Reads until the server closes the stream, returning the last `Disconnect`
/// reason seen.
async fn read_to_close(stream: &mut TcpStream) -> Option<String> {
    let frame = FrameConfig::default();
    let mut reason = None;
    tokio::time::timeout(WAIT, async {
        loop {
            match read_packet(stream, &frame).await {
                Ok(Packet::Disconnect { reason: r }) => reason = Some(r),
                Ok(_) => {}
                Err(FrameError::ConnectionClosed) | Err(FrameError::Io(_)) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    })
    .await
    .expect("server did not close the connection");
    reason
}

async fn handshake(addr: SocketAddr, name: &str) -> (TcpStream, PlayerId) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    send(
        &mut stream,
        Packet::Handshake {
            version: PROTOCOL_VERSION,
            name: name.to_string(),
            skin: Some(vec![7; 16]),
        },
    )
    .await;
    match recv_until(&mut stream, |_| true).await {
        Packet::HandshakeAck {
            player_id, name: n, ..
        } => {
            assert_eq!(n, name);
            (stream, player_id)
        }
        other => panic!("expected HandshakeAck, got {other:?}"),
    }
}

fn holds_chunk(coord: ChunkCoord) -> impl FnMut(&Packet) -> bool {
    move |packet| match packet {
        Packet::ChunkStock { coord: c } | Packet::WorldChunk { coord: c, .. } => *c == coord,
        _ => false,
    }
}

#[tokio::test]
async fn test_handshake_then_spawn_chunk() {
    let (addr, server) = start_test_server(test_config()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    send(
        &mut stream,
        Packet::Handshake {
            version: PROTOCOL_VERSION,
            name: "alice".to_string(),
            skin: None,
        },
    )
    .await;

    let (spawn, seed) = match recv_until(&mut stream, |_| true).await {
        Packet::HandshakeAck {
            version,
            player_id,
            spawn,
            seed,
            view_radius,
            ..
        } => {
            assert_eq!(version, PROTOCOL_VERSION);
            assert_eq!(player_id, 1);
            assert_eq!(view_radius, 1);
            (spawn, seed)
        }
        other => panic!("expected HandshakeAck, got {other:?}"),
    };
    assert_eq!(seed, server.config().world.seed);

    let first_chunk = recv_until(&mut stream, |p| {
        matches!(p, Packet::ChunkStock { .. } | Packet::WorldChunk { .. })
    })
    .await;
    assert_eq!(first_chunk, Packet::ChunkStock {
        coord: ChunkCoord::containing(spawn)
    });
    server.shutdown();
}

#[tokio::test]
async fn test_block_edit_reaches_both_players() {
    let (addr, server) = start_test_server(test_config()).await;
    let (mut alice, _) = handshake(addr, "alice").await;
    let (mut bob, _) = handshake(addr, "bob").await;

    let sky = ChunkCoord::new(0, 12, 0);
    for (stream, x) in [(&mut alice, 8.5), (&mut bob, 10.5)] {
        send(
            stream,
            Packet::MoveIntent {
                seq: 1,
                position: [x, 200.0, 8.5],
                orientation: Orientation::default(),
            },
        )
        .await;
    }
    recv_until(&mut alice, holds_chunk(sky)).await;
    recv_until(&mut bob, holds_chunk(sky)).await;

    let pos = BlockPos::new(8, 203, 8);
    send(
        &mut alice,
        Packet::BlockIntent {
            seq: 2,
            pos,
            action: BlockAction::Place,
            block: Block::Stone,
        },
    )
    .await;

    for stream in [&mut alice, &mut bob] {
        let delta = recv_until(stream, |p| {
            matches!(p, Packet::BlockDelta { pos: at, .. } if *at == pos)
        })
        .await;
        assert!(matches!(delta, Packet::BlockDelta { block: Block::Stone, .. }));
    }
    server.shutdown();
}

#[tokio::test]
async fn test_occupied_cell_is_rejected_with_resync() {
    let (addr, server) = start_test_server(test_config()).await;
    let (mut alice, _) = handshake(addr, "alice").await;
    send(
        &mut alice,
        Packet::MoveIntent {
            seq: 1,
            position: [8.5, 200.0, 8.5],
            orientation: Orientation::default(),
        },
    )
    .await;
    recv_until(&mut alice, holds_chunk(ChunkCoord::new(0, 12, 0))).await;

    let pos = BlockPos::new(8, 203, 8);
    for (seq, block) in [(2, Block::Stone), (3, Block::Dirt)] {
        send(
            &mut alice,
            Packet::BlockIntent {
                seq,
                pos,
                action: BlockAction::Place,
                block,
            },
        )
        .await;
    }
    let rejected = recv_until(&mut alice, |p| matches!(p, Packet::IntentRejected { .. })).await;
    assert!(matches!(rejected, Packet::IntentRejected { seq: 3, .. }));
    let resync = recv_until(&mut alice, |_| true).await;
    assert!(matches!(resync, Packet::BlockDelta { block: Block::Stone, .. }));
    server.shutdown();
}

#[tokio::test]
async fn test_leave_is_broadcast() {
    let (addr, server) = start_test_server(test_config()).await;
    let (mut alice, alice_id) = handshake(addr, "alice").await;
    let (mut bob, _) = handshake(addr, "bob").await;
    recv_until(&mut alice, |p| matches!(p, Packet::PlayerJoined { .. })).await;

    send(
        &mut alice,
        Packet::Disconnect {
            reason: "bye".to_string(),
        },
    )
    .await;
    let left = recv_until(&mut bob, |p| matches!(p, Packet::PlayerLeft { .. })).await;
    assert_eq!(left, Packet::PlayerLeft {
        player_id: alice_id
    });
    server.shutdown();
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let mut config = test_config();
    config.network.idle_timeout_secs = 1;
    let (addr, server) = start_test_server(config).await;
    let (mut alice, _) = handshake(addr, "alice").await;

    let reason = read_to_close(&mut alice).await;
    assert_eq!(reason.as_deref(), Some("timed out"));
    server.shutdown();
}

#[tokio::test]
async fn test_server_full() {
    let mut config = test_config();
    config.network.max_players = 1;
    let (addr, server) = start_test_server(config).await;
    let (_alice, _) = handshake(addr, "alice").await;

    let mut bob = TcpStream::connect(addr).await.unwrap();
    send(
        &mut bob,
        Packet::Handshake {
            version: PROTOCOL_VERSION,
            name: "bob".to_string(),
            skin: None,
        },
    )
    .await;
    assert_eq!(read_to_close(&mut bob).await.as_deref(), Some("server full"));
    server.shutdown();
}

#[tokio::test]
async fn test_wrong_version_refused() {
    let (addr, server) = start_test_server(test_config()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    send(
        &mut stream,
        Packet::Handshake {
            version: PROTOCOL_VERSION + 1,
            name: "old".to_string(),
            skin: None,
        },
    )
    .await;
    let reason = read_to_close(&mut stream).await.unwrap();
    assert!(reason.contains("unsupported protocol version"), "{reason}");
    server.shutdown();
}

#[tokio::test]
async fn test_missing_handshake_times_out() {
    let mut config = test_config();
    config.network.handshake_timeout_secs = 1;
    let (addr, server) = start_test_server(config).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    assert_eq!(
        read_to_close(&mut stream).await.as_deref(),
        Some("handshake timed out")
    );
    server.shutdown();
}

#[tokio::test]
async fn test_malformed_packet_only_drops_sender() {
    let (addr, server) = start_test_server(test_config()).await;
    let (mut alice, _) = handshake(addr, "alice").await;

    // Length 1, kind 200.
    alice.write_all(&[0, 0, 0, 1, 200]).await.unwrap();
    let reason = read_to_close(&mut alice).await.unwrap();
    assert!(reason.starts_with("protocol error"), "{reason}");

    let (_bob, bob_id) = handshake(addr, "bob").await;
    assert_eq!(bob_id, 2);
    server.shutdown();
}

#[tokio::test]
async fn test_shutdown_disconnects_clients() {
    let (addr, server) = start_test_server(test_config()).await;
    let (mut alice, _) = handshake(addr, "alice").await;
    recv_until(&mut alice, |p| matches!(p, Packet::ChunkStock { .. })).await;

    server.shutdown();
    assert_eq!(
        read_to_close(&mut alice).await.as_deref(),
        Some("server shutting down")
    );
}
