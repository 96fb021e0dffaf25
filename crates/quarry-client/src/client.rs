//! TCP client for a Quarry server.
//!
//! Manages the full connection lifecycle: connecting, handshaking, keep-alive
//! and clean disconnect. State changes are broadcast via a [`watch`] channel
//! so any number of consumers can react without polling; decoded server
//! packets arrive on an mpsc queue read through [`GameClient::next_packet`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use quarry_protocol::{
    BlockAction, FrameConfig, FrameError, Orientation, PROTOCOL_VERSION, Packet, PlayerId,
    read_packet, write_packet,
};
use quarry_world::{Block, BlockPos};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex, mpsc, watch};

use crate::error::ClientError;

/// How long to wait for `HandshakeAck`.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between client keep-alives.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Decoded packets buffered before the reader waits on the consumer.
const PACKET_QUEUE_CAPACITY: usize = 1024;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attempting to establish a TCP connection.
    Connecting,
    /// Handshake sent, waiting for the server's answer.
    Handshaking,
    /// Handshake accepted; intents may be sent.
    Connected,
    /// Connection lost or intentionally closed.
    Disconnected,
}

/// Observable connection state backed by a [`watch`] channel.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    /// Set the current connection state, notifying all subscribers.
    pub fn set(&self, state: ConnectionState) {
        let _ = self.tx.send(state);
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}

/// What the server told us in `HandshakeAck`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub player_id: PlayerId,
    pub name: String,
    pub seed: u64,
    pub spawn: [f32; 3],
    pub tick: u64,
    pub view_radius: u8,
}

/// Handle to a joined game session.
pub struct GameClient {
    session: SessionInfo,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    frame: FrameConfig,
    state: Arc<ConnectionStateWatch>,
    packets: mpsc::Receiver<Packet>,
    next_seq: AtomicU32,
    /// Sending `true` causes reader and keep-alive tasks to exit.
    shutdown_tx: watch::Sender<bool>,
}

impl GameClient {
    /// Connect, send the handshake and wait for `HandshakeAck`.
    ///
    /// On success the reader and keep-alive tasks are running and the state
    /// is [`ConnectionState::Connected`].
    pub async fn connect(
        addr: impl ToSocketAddrs,
        name: &str,
        skin: Option<Vec<u8>>,
    ) -> Result<Self, ClientError> {
        let state = Arc::new(ConnectionStateWatch::new());
        let frame = FrameConfig::default();
        state.set(ConnectionState::Connecting);

        let result = Self::handshake(addr, name, skin, &state, &frame).await;
        let (session, reader, writer) = match result {
            Ok(joined) => joined,
            Err(e) => {
                state.set(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        state.set(ConnectionState::Connected);
        tracing::info!(
            "Joined as player {} ({}) with seed {:#x}",
            session.player_id,
            session.name,
            session.seed
        );

        let writer = Arc::new(Mutex::new(writer));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (packet_tx, packet_rx) = mpsc::channel(PACKET_QUEUE_CAPACITY);

        let reader_state = Arc::clone(&state);
        let reader_frame = frame.clone();
        let mut reader_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            Self::read_loop(reader, &reader_frame, packet_tx, &reader_state, &mut reader_shutdown)
                .await;
        });

        let ka_writer = Arc::clone(&writer);
        let ka_state = Arc::clone(&state);
        let ka_frame = frame.clone();
        let mut ka_shutdown = shutdown_rx;
        tokio::spawn(async move {
            Self::keepalive_loop(&ka_writer, &ka_frame, &ka_state, &mut ka_shutdown).await;
        });

        Ok(Self {
            session,
            writer,
            frame,
            state,
            packets: packet_rx,
            next_seq: AtomicU32::new(1),
            shutdown_tx,
        })
    }

    async fn handshake(
        addr: impl ToSocketAddrs,
        name: &str,
        skin: Option<Vec<u8>>,
        state: &ConnectionStateWatch,
        frame: &FrameConfig,
    ) -> Result<(SessionInfo, OwnedReadHalf, OwnedWriteHalf), ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        state.set(ConnectionState::Handshaking);
        let hello = Packet::Handshake {
            version: PROTOCOL_VERSION,
            name: name.to_string(),
            skin,
        };
        write_packet(&mut writer, &hello, frame).await?;

        let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_packet(&mut reader, frame))
            .await
            .map_err(|_| ClientError::HandshakeTimeout(HANDSHAKE_TIMEOUT))??;
        match reply {
            Packet::HandshakeAck {
                player_id,
                name,
                seed,
                spawn,
                tick,
                view_radius,
                ..
            } => Ok((
                SessionInfo {
                    player_id,
                    name,
                    seed,
                    spawn,
                    tick,
                    view_radius,
                },
                reader,
                writer,
            )),
            Packet::Disconnect { reason } => Err(ClientError::Refused(reason)),
            other => Err(ClientError::UnexpectedPacket(other.name())),
        }
    }

    /// Session details from the handshake.
    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    /// Return the connection state watch.
    pub fn state(&self) -> &Arc<ConnectionStateWatch> {
        &self.state
    }

    /// Next packet from the server; `None` once the connection is gone and
    /// every buffered packet has been read.
    pub async fn next_packet(&mut self) -> Option<Packet> {
        self.packets.recv().await
    }

    /// Buffered packet, if any, without waiting.
    pub fn try_next_packet(&mut self) -> Option<Packet> {
        self.packets.try_recv().ok()
    }

    fn take_seq(&self) -> u32 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    async fn send(&self, packet: &Packet) -> Result<(), ClientError> {
        if self.state.current() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = write_packet(&mut *writer, packet, &self.frame).await {
            self.state.set(ConnectionState::Disconnected);
            return Err(e.into());
        }
        Ok(())
    }

    /// Ask to move. Returns the intent's sequence number.
    pub async fn send_move(
        &self,
        position: [f32; 3],
        orientation: Orientation,
    ) -> Result<u32, ClientError> {
        let seq = self.take_seq();
        self.send(&Packet::MoveIntent {
            seq,
            position,
            orientation,
        })
        .await?;
        Ok(seq)
    }

    /// Ask to place `block` at `pos`.
    pub async fn send_place(&self, pos: BlockPos, block: Block) -> Result<u32, ClientError> {
        let seq = self.take_seq();
        self.send(&Packet::BlockIntent {
            seq,
            pos,
            action: BlockAction::Place,
            block,
        })
        .await?;
        Ok(seq)
    }

    /// Ask to break the block at `pos`. `expected` is the block the client
    /// believes is there, or Air to break whatever it is.
    pub async fn send_break(&self, pos: BlockPos, expected: Block) -> Result<u32, ClientError> {
        let seq = self.take_seq();
        self.send(&Packet::BlockIntent {
            seq,
            pos,
            action: BlockAction::Break,
            block: expected,
        })
        .await?;
        Ok(seq)
    }

    /// Ask to change the selected hotbar slot.
    pub async fn select_slot(&self, slot: u8) -> Result<u32, ClientError> {
        let seq = self.take_seq();
        self.send(&Packet::SelectSlotIntent { seq, slot }).await?;
        Ok(seq)
    }

    /// Send `Disconnect`, stop the background tasks and close the stream.
    pub async fn disconnect(&self, reason: &str) {
        if self.state.current() == ConnectionState::Connected {
            let mut writer = self.writer.lock().await;
            let goodbye = Packet::Disconnect {
                reason: reason.to_string(),
            };
            let _ = write_packet(&mut *writer, &goodbye, &self.frame).await;
            let _ = writer.shutdown().await;
        }
        let _ = self.shutdown_tx.send(true);
        self.state.set(ConnectionState::Disconnected);
    }

    /// Forward decoded packets until the connection closes or shutdown is
    /// signalled.
    async fn read_loop(
        mut reader: OwnedReadHalf,
        frame: &FrameConfig,
        packets: mpsc::Sender<Packet>,
        state: &ConnectionStateWatch,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                result = read_packet(&mut reader, frame) => {
                    match result {
                        Ok(packet) => {
                            let closing = matches!(packet, Packet::Disconnect { .. });
                            if let Packet::Disconnect { reason } = &packet {
                                tracing::info!("Server closed the session: {reason}");
                            }
                            if packets.send(packet).await.is_err() || closing {
                                break;
                            }
                        }
                        Err(FrameError::ConnectionClosed) => break,
                        Err(e) => {
                            tracing::warn!("Connection error: {e}");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        state.set(ConnectionState::Disconnected);
    }

    /// Send a keep-alive every [`KEEPALIVE_INTERVAL`] while connected.
    async fn keepalive_loop(
        writer: &Mutex<OwnedWriteHalf>,
        frame: &FrameConfig,
        state: &ConnectionStateWatch,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if state.current() != ConnectionState::Connected {
                        break;
                    }
                    let mut w = writer.lock().await;
                    if write_packet(&mut *w, &Packet::KeepAlive, frame).await.is_err() {
                        state.set(ConnectionState::Disconnected);
                        break;
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
