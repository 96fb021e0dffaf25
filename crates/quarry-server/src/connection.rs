//! Per-connection I/O tasks.
//!
//! A connection task owns the socket. It performs the handshake, hands the
//! session to the tick loop as a [`JoinRequest`], then keeps reading packets
//! into the session's inbound queue. A separate writer task drains the
//! outbound queue of pre-encoded frames. Neither task touches world or
//! player state.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use quarry_config::NetworkConfig;
use quarry_protocol::{FrameConfig, FrameError, MAX_STRING_LEN, PROTOCOL_VERSION, Packet, read_packet, write_packet};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::intent::QueuedIntent;
use crate::platform::{SocketConfig, configure_stream};
use crate::session::{CloseReason, ConnectionId, Inbound, JoinRequest, Lifecycle, SessionState};

/// How long a finished reader waits for its writer to drain.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings and shared handles every connection task needs.
#[derive(Debug)]
pub struct ConnectionContext {
    pub frame: FrameConfig,
    pub socket: SocketConfig,
    pub handshake_timeout: Duration,
    pub intent_queue_capacity: usize,
    pub send_queue_capacity: usize,
    /// Server-wide arrival counter stamped onto every decoded intent.
    pub arrivals: AtomicU64,
    pub joins: mpsc::Sender<JoinRequest>,
}

impl ConnectionContext {
    pub fn new(network: &NetworkConfig, joins: mpsc::Sender<JoinRequest>) -> Self {
        Self {
            frame: FrameConfig {
                max_frame_len: network.max_frame_len,
            },
            socket: SocketConfig::from_network(network),
            handshake_timeout: network.handshake_timeout(),
            intent_queue_capacity: network.intent_queue_capacity,
            send_queue_capacity: network.send_queue_capacity,
            arrivals: AtomicU64::new(0),
            joins,
        }
    }

    fn next_arrival(&self) -> u64 {
        self.arrivals.fetch_add(1, Ordering::Relaxed)
    }
}

/// Accepted handshake contents.
struct Hello {
    name: String,
    skin: Option<Vec<u8>>,
}

/// Checks a handshake's version and player name.
fn check_handshake(packet: Packet) -> Result<Hello, String> {
    let got = packet.name();
    let Packet::Handshake {
        version,
        name,
        skin,
    } = packet
    else {
        return Err(format!("expected Handshake, got {got}"));
    };
    if version != PROTOCOL_VERSION {
        return Err(format!(
            "unsupported protocol version {version}, server speaks {PROTOCOL_VERSION}"
        ));
    }
    let name = name.trim().to_string();
    if name.is_empty() || name.len() > MAX_STRING_LEN {
        return Err("invalid player name".to_string());
    }
    if name.chars().any(char::is_control) {
        return Err("player name contains control characters".to_string());
    }
    Ok(Hello { name, skin })
}

/// Drive one connection from accept to close.
pub async fn handle_connection(
    id: ConnectionId,
    stream: TcpStream,
    peer: SocketAddr,
    ctx: std::sync::Arc<ConnectionContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = configure_stream(&stream, &ctx.socket) {
        warn!("Could not configure socket for {peer}: {e}");
    }

    let mut lifecycle = Lifecycle::new();
    advance(&mut lifecycle, SessionState::Handshaking, id);

    let (mut reader, mut writer) = stream.into_split();

    let handshake = tokio::select! {
        result = tokio::time::timeout(ctx.handshake_timeout, read_packet(&mut reader, &ctx.frame)) => match result {
            Ok(Ok(packet)) => check_handshake(packet),
            Ok(Err(FrameError::ConnectionClosed)) => {
                debug!("{peer} closed before handshaking");
                Err(String::new())
            }
            Ok(Err(e)) => Err(format!("bad handshake: {e}")),
            Err(_) => Err("handshake timed out".to_string()),
        },
        _ = shutdown.changed() => Err(CloseReason::ServerShutdown.message()),
    };

    let hello = match handshake {
        Ok(hello) => hello,
        Err(reason) => {
            advance(&mut lifecycle, SessionState::Closing, id);
            if !reason.is_empty() {
                warn!("Refusing {peer} ({id:?}): {reason}");
                let _ = write_packet(&mut writer, &Packet::Disconnect { reason }, &ctx.frame).await;
            }
            let _ = writer.shutdown().await;
            advance(&mut lifecycle, SessionState::Closed, id);
            return;
        }
    };

    let (inbound_tx, inbound_rx) = mpsc::channel(ctx.intent_queue_capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(ctx.send_queue_capacity);
    let (close_tx, close_rx) = watch::channel(false);

    let writer_task = tokio::spawn(write_loop(id, writer, outbound_rx));

    info!("{peer} ({id:?}) handshook as {:?}", hello.name);
    let request = JoinRequest {
        connection_id: id,
        peer: Some(peer),
        name: hello.name,
        skin: hello.skin,
        lifecycle,
        inbound: inbound_rx,
        outbound: outbound_tx,
        close: close_tx,
    };
    if ctx.joins.send(request).await.is_err() {
        warn!("Tick loop is gone, dropping {id:?}");
        return;
    }

    read_loop(id, &mut reader, &ctx, inbound_tx, close_rx).await;

    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer_task).await {
        Ok(_) => {}
        Err(_) => warn!("Writer for {id:?} did not drain in time"),
    }
    info!("Connection {id:?} closed");
}

/// Forward decoded packets to the tick loop until the connection ends or the
/// tick loop closes the session.
async fn read_loop(
    id: ConnectionId,
    reader: &mut OwnedReadHalf,
    ctx: &ConnectionContext,
    inbound: mpsc::Sender<Inbound>,
    mut close_rx: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            result = read_packet(reader, &ctx.frame) => classify(id, result, ctx),
            _ = close_rx.changed() => break,
        };
        let closing = matches!(event, Inbound::Closed(_));
        if inbound.send(event).await.is_err() || closing {
            break;
        }
    }
}

fn classify(id: ConnectionId, result: Result<Packet, FrameError>, ctx: &ConnectionContext) -> Inbound {
    match result {
        Ok(Packet::KeepAlive) => Inbound::KeepAlive,
        Ok(Packet::Disconnect { reason }) => {
            debug!("{id:?} disconnected: {reason}");
            Inbound::Closed(CloseReason::ClientDisconnect)
        }
        Ok(packet) => {
            let name = packet.name();
            match QueuedIntent::from_packet(packet, ctx.next_arrival()) {
                Some(intent) => Inbound::Intent(intent),
                None => {
                    warn!("{id:?} sent unexpected {name}");
                    Inbound::Closed(CloseReason::Protocol(format!("unexpected {name}")))
                }
            }
        }
        Err(FrameError::ConnectionClosed) => Inbound::Closed(CloseReason::ConnectionLost),
        Err(FrameError::Io(e)) => {
            debug!("{id:?} read failed: {e}");
            Inbound::Closed(CloseReason::ConnectionLost)
        }
        Err(e) => {
            warn!("{id:?} protocol error: {e}");
            Inbound::Closed(CloseReason::Protocol(e.to_string()))
        }
    }
}

/// Write frames in queue order until every sender is dropped.
async fn write_loop(id: ConnectionId, mut writer: OwnedWriteHalf, mut frames: mpsc::Receiver<Bytes>) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            debug!("{id:?} write failed: {e}");
            return;
        }
        trace!("{id:?} sent {} bytes", frame.len());
    }
    let _ = writer.shutdown().await;
}

fn advance(lifecycle: &mut Lifecycle, to: SessionState, id: ConnectionId) {
    if let Err(e) = lifecycle.transition(to) {
        warn!("{id:?}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello(version: u8, name: &str) -> Packet {
        Packet::Handshake {
            version,
            name: name.to_string(),
            skin: None,
        }
    }

    #[test]
    fn test_handshake_accepts_trimmed_name() {
        let accepted = check_handshake(hello(PROTOCOL_VERSION, "  steve ")).unwrap();
        assert_eq!(accepted.name, "steve");
    }

    #[test]
    fn test_handshake_rejections() {
        assert!(check_handshake(hello(PROTOCOL_VERSION + 1, "steve")).is_err());
        assert!(check_handshake(hello(PROTOCOL_VERSION, "   ")).is_err());
        assert!(check_handshake(hello(PROTOCOL_VERSION, "a\u{7}b")).is_err());
        assert!(check_handshake(Packet::KeepAlive).is_err());
    }

    #[test]
    fn test_classify_packets() {
        let (joins, _rx) = mpsc::channel(1);
        let ctx = ConnectionContext::new(&NetworkConfig::default(), joins);
        let id = ConnectionId(1);

        assert_eq!(classify(id, Ok(Packet::KeepAlive), &ctx), Inbound::KeepAlive);
        assert_eq!(
            classify(id, Err(FrameError::ConnectionClosed), &ctx),
            Inbound::Closed(CloseReason::ConnectionLost)
        );
        assert!(matches!(
            classify(id, Ok(Packet::PlayerLeft { player_id: 1 }), &ctx),
            Inbound::Closed(CloseReason::Protocol(_))
        ));

        let first = classify(id, Ok(Packet::SelectSlotIntent { seq: 1, slot: 0 }), &ctx);
        let second = classify(id, Ok(Packet::SelectSlotIntent { seq: 2, slot: 0 }), &ctx);
        match (first, second) {
            (Inbound::Intent(a), Inbound::Intent(b)) => assert!(a.arrival < b.arrival),
            other => panic!("expected intents, got {other:?}"),
        }
    }
}
