//! Connection lifecycle and per-session state owned by the tick loop.
//!
//! Every connection walks `Connecting → Handshaking → Active → Closing →
//! Closed`. The connection task drives the first two steps; once the
//! handshake succeeds it hands a [`JoinRequest`] to the tick loop, which owns
//! the session from then on.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use quarry_protocol::{Packet, PlayerId, encode};
use quarry_world::ChunkCoord;
use rustc_hash::FxHashSet;
use tokio::sync::{mpsc, watch};

use crate::intent::QueuedIntent;

/// Unique identifier for a TCP connection within a server run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// Atomic generator for monotonically increasing [`ConnectionId`]s.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return the next unique [`ConnectionId`].
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// State machine for a connection's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, nothing read yet.
    Connecting,
    /// Waiting for the handshake packet.
    Handshaking,
    /// Player registered; intents flow to the tick loop.
    Active,
    /// Flushing a final `Disconnect` and releasing the player.
    Closing,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Whether `self → next` is a legal step.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Handshaking)
                | (Connecting, Closing)
                | (Handshaking, Active)
                | (Handshaking, Closing)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }
}

/// Errors raised by the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("invalid session transition {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

/// Current lifecycle state with checked transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    state: SessionState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transition(&mut self, to: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(to) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent `Disconnect`.
    ClientDisconnect,
    /// The transport closed or failed.
    ConnectionLost,
    /// Malformed or unexpected packet.
    Protocol(String),
    /// No packet within the idle timeout.
    IdleTimeout,
    /// The send queue stayed full for too many ticks.
    Overflow,
    /// Refused at join time.
    ServerFull,
    /// The server is stopping.
    ServerShutdown,
}

impl CloseReason {
    /// Text carried in the `Disconnect` packet.
    pub fn message(&self) -> String {
        match self {
            Self::ClientDisconnect => "goodbye".to_string(),
            Self::ConnectionLost => "connection lost".to_string(),
            Self::Protocol(detail) => format!("protocol error: {detail}"),
            Self::IdleTimeout => "timed out".to_string(),
            Self::Overflow => "too slow to keep up".to_string(),
            Self::ServerFull => "server full".to_string(),
            Self::ServerShutdown => "server shutting down".to_string(),
        }
    }
}

/// Events forwarded by a connection reader to the tick loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Intent(QueuedIntent),
    KeepAlive,
    Closed(CloseReason),
}

/// Everything the tick loop needs to adopt a freshly handshaken connection.
#[derive(Debug)]
pub struct JoinRequest {
    pub connection_id: ConnectionId,
    pub peer: Option<SocketAddr>,
    pub name: String,
    pub skin: Option<Vec<u8>>,
    pub lifecycle: Lifecycle,
    pub inbound: mpsc::Receiver<Inbound>,
    pub outbound: mpsc::Sender<Bytes>,
    /// Set to `true` to stop the connection's reader.
    pub close: watch::Sender<bool>,
}

/// Result of pushing onto an [`Outbox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Sent,
    Backlogged,
    Closed,
}

/// Bounded outbound path: the channel to the writer task plus a small local
/// backlog used while the channel is full. Packets are never dropped while
/// the session lives; a backlog that persists is reported so the tick loop
/// can close the session.
#[derive(Debug)]
pub struct Outbox {
    tx: mpsc::Sender<Bytes>,
    backlog: VecDeque<Bytes>,
    max_backlog: usize,
}

impl Outbox {
    pub fn new(tx: mpsc::Sender<Bytes>, max_backlog: usize) -> Self {
        Self {
            tx,
            backlog: VecDeque::new(),
            max_backlog,
        }
    }

    /// Queues an encoded frame, preserving order behind any backlog.
    pub fn push(&mut self, frame: Bytes) -> PushOutcome {
        if !self.backlog.is_empty() {
            self.backlog.push_back(frame);
            return PushOutcome::Backlogged;
        }
        match self.tx.try_send(frame) {
            Ok(()) => PushOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                self.backlog.push_back(frame);
                PushOutcome::Backlogged
            }
            Err(mpsc::error::TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    /// Moves as much backlog into the channel as fits. Returns `false` if the
    /// writer has gone away.
    pub fn flush(&mut self) -> bool {
        while let Some(frame) = self.backlog.pop_front() {
            match self.tx.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(frame)) => {
                    self.backlog.push_front(frame);
                    return true;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
        }
        !self.tx.is_closed()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Whether the backlog has outgrown its hard cap.
    pub fn is_overflowing(&self) -> bool {
        self.backlog.len() > self.max_backlog
    }

    /// Best-effort send used while closing: skipped when the channel is full.
    pub fn send_final(&mut self, frame: Bytes) {
        self.flush();
        if self.backlog.is_empty() {
            let _ = self.tx.try_send(frame);
        }
    }
}

/// Encodes a packet into a ready-to-write frame.
pub fn frame(packet: &Packet) -> Option<Bytes> {
    match encode(packet) {
        Ok(bytes) => Some(Bytes::from(bytes)),
        Err(e) => {
            tracing::error!("Dropping unencodable {}: {e}", packet.name());
            None
        }
    }
}

/// An active session, owned by the tick loop.
#[derive(Debug)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub player_id: PlayerId,
    pub lifecycle: Lifecycle,
    pub inbound: mpsc::Receiver<Inbound>,
    pub outbox: Outbox,
    pub close: watch::Sender<bool>,
    /// Time the last inbound event was drained.
    pub last_activity: Instant,
    /// Time the last server keep-alive was queued.
    pub last_keepalive: Instant,
    /// Chunks the client currently holds.
    pub known_chunks: FxHashSet<ChunkCoord>,
    /// Consecutive ticks that ended with a non-empty backlog.
    pub overflow_ticks: u32,
    /// Set once the session must close at the next opportunity.
    pub pending_close: Option<CloseReason>,
}

impl Session {
    pub fn new(
        connection_id: ConnectionId,
        player_id: PlayerId,
        lifecycle: Lifecycle,
        inbound: mpsc::Receiver<Inbound>,
        outbox: Outbox,
        close: watch::Sender<bool>,
        now: Instant,
    ) -> Self {
        Self {
            connection_id,
            player_id,
            lifecycle,
            inbound,
            outbox,
            close,
            last_activity: now,
            last_keepalive: now,
            known_chunks: FxHashSet::default(),
            overflow_ticks: 0,
            pending_close: None,
        }
    }

    /// Queues a packet. A closed writer marks the session for closing.
    pub fn send(&mut self, packet: &Packet) {
        let Some(bytes) = frame(packet) else { return };
        self.send_frame(bytes);
    }

    /// Queues a pre-encoded frame, shared between recipients.
    pub fn send_frame(&mut self, bytes: Bytes) {
        if self.outbox.push(bytes) == PushOutcome::Closed {
            self.mark_closed(CloseReason::ConnectionLost);
        }
    }

    /// Records a close reason; the first one wins.
    pub fn mark_closed(&mut self, reason: CloseReason) {
        if self.pending_close.is_none() {
            self.pending_close = Some(reason);
        }
    }

    pub fn is_closing(&self) -> bool {
        self.pending_close.is_some()
    }
}
