//! The fixed-rate tick loop.
//!
//! [`TickBroadcaster`] is the only writer of world and player state. Each tick
//! it admits new players, drains every session's inbound queue, applies the
//! merged intents in arrival order, and fans the resulting delta out to every
//! session. Nothing in a tick awaits; connection tasks only ever talk to it
//! through channels.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use quarry_config::Config;
use quarry_protocol::{PROTOCOL_VERSION, Packet, PlayerId};
use quarry_world::{BlockPos, ChunkCoord, SetBlockError, WorldStore};
use rustc_hash::FxHashSet;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::error::ServerError;
use crate::fanout::{FanOutParams, fan_out, player_state, within_view};
use crate::intent::{IntentKind, QueuedIntent, merge_by_arrival};
use crate::registry::PlayerRegistry;
use crate::rules::{RuleSet, ValidationError};
use crate::session::{
    CloseReason, Inbound, JoinRequest, Lifecycle, Outbox, Session, SessionState, frame,
};

/// Tick-loop settings, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct TickSettings {
    pub rules: RuleSet,
    pub tick_duration: Duration,
    pub max_players: usize,
    pub view_radius: u8,
    pub chunks_per_tick: usize,
    pub idle_timeout: Duration,
    pub keepalive_interval: Duration,
    pub overflow_grace_ticks: u32,
    /// Inbound events drained from one session per tick.
    pub intent_queue_capacity: usize,
    /// Backlog size that closes a session immediately.
    pub max_backlog: usize,
}

impl TickSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            rules: RuleSet::from(&config.rules),
            tick_duration: config.rules.tick_duration(),
            max_players: config.network.max_players as usize,
            view_radius: config.rules.view_radius,
            chunks_per_tick: config.rules.chunks_per_tick,
            idle_timeout: config.network.idle_timeout(),
            keepalive_interval: config.network.keepalive_interval(),
            overflow_grace_ticks: config.network.overflow_grace_ticks.max(1),
            intent_queue_capacity: config.network.intent_queue_capacity,
            max_backlog: config.network.send_queue_capacity.saturating_mul(4),
        }
    }
}

impl Default for TickSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub accepted: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub block_changes: usize,
    pub joined: Vec<PlayerId>,
    pub closed: Vec<(PlayerId, CloseReason)>,
}

impl TickReport {
    fn is_quiet(&self) -> bool {
        self.accepted == 0
            && self.rejected == 0
            && self.duplicates == 0
            && self.joined.is_empty()
            && self.closed.is_empty()
    }
}

/// Owner of the world, the player registry and every active session.
pub struct TickBroadcaster {
    settings: TickSettings,
    world: WorldStore,
    registry: PlayerRegistry,
    sessions: BTreeMap<PlayerId, Session>,
    joins: mpsc::Receiver<JoinRequest>,
    tick: u64,
}

/// Spawn point on top of the highest generated block in column (8, 8).
pub fn spawn_point(world: &WorldStore) -> [f32; 3] {
    let top = world.generator().column_top(8, 8);
    [8.5, (top + 1) as f32, 8.5]
}

impl TickBroadcaster {
    pub fn new(settings: TickSettings, world: WorldStore, joins: mpsc::Receiver<JoinRequest>) -> Self {
        let registry = PlayerRegistry::new(spawn_point(&world));
        Self {
            settings,
            world,
            registry,
            sessions: BTreeMap::new(),
            joins,
            tick: 0,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn world(&self) -> &WorldStore {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut WorldStore {
        &mut self.world
    }

    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Run ticks at the configured rate until `shutdown` turns `true`, then
    /// close every session.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.tick_duration);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Tick loop running every {:?} (seed {:#x})",
            self.settings.tick_duration,
            self.world.seed()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.run_tick(Instant::now());
                    if report.is_quiet() {
                        trace!("Tick {} idle", report.tick);
                    } else {
                        debug!(
                            "Tick {}: {} accepted, {} rejected, {} duplicate, {} block changes, {} joined, {} closed",
                            report.tick,
                            report.accepted,
                            report.rejected,
                            report.duplicates,
                            report.block_changes,
                            report.joined.len(),
                            report.closed.len()
                        );
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() {
                        break;
                    }
                }
            }
        }

        let report = self.shutdown();
        info!(
            "Tick loop stopped at tick {} after closing {} sessions",
            self.tick,
            report.closed.len()
        );
    }

    /// Advance the simulation by one tick.
    pub fn run_tick(&mut self, now: Instant) -> TickReport {
        self.tick += 1;
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };
        let mut moved = BTreeSet::new();

        while let Ok(request) = self.joins.try_recv() {
            self.admit(request, now, &mut report, &mut moved);
        }

        let batches = self.drain_inbound(now);
        self.close_pending(&mut report);
        self.process_intents(batches, &mut report, &mut moved);

        let changes = self.world.take_changes();
        report.block_changes = changes.len();
        let params = FanOutParams {
            tick: self.tick,
            now,
            view_radius: self.settings.view_radius as u32,
            chunks_per_tick: self.settings.chunks_per_tick,
            keepalive_interval: self.settings.keepalive_interval,
        };
        fan_out(
            &self.world,
            &self.registry,
            &mut self.sessions,
            &changes,
            &moved,
            &params,
        );

        self.settle_outboxes();
        self.close_pending(&mut report);
        report
    }

    /// Close every session with [`CloseReason::ServerShutdown`].
    pub fn shutdown(&mut self) -> TickReport {
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };
        let ids: Vec<PlayerId> = self.sessions.keys().copied().collect();
        for id in ids {
            self.close_session(id, CloseReason::ServerShutdown, &mut report);
        }
        // Refuse anyone who handshook during the last tick.
        while let Ok(request) = self.joins.try_recv() {
            refuse(request, CloseReason::ServerShutdown);
        }
        report
    }

    // ------------------------------------------------------------------
    // Joins and leaves
    // ------------------------------------------------------------------

    fn admit(
        &mut self,
        request: JoinRequest,
        now: Instant,
        report: &mut TickReport,
        moved: &mut BTreeSet<PlayerId>,
    ) {
        if self.registry.len() >= self.settings.max_players {
            info!(
                "Refusing {:?} from {:?}: server full",
                request.name, request.peer
            );
            refuse(request, CloseReason::ServerFull);
            return;
        }

        let JoinRequest {
            connection_id,
            peer,
            name,
            skin,
            mut lifecycle,
            inbound,
            outbound,
            close,
        } = request;

        let player = self.registry.register(name, skin);
        let player_id = player.id;
        let name = player.name.clone();
        advance(&mut lifecycle, SessionState::Active, player_id);

        let mut session = Session::new(
            connection_id,
            player_id,
            lifecycle,
            inbound,
            Outbox::new(outbound, self.settings.max_backlog),
            close,
            now,
        );
        session.send(&Packet::HandshakeAck {
            version: PROTOCOL_VERSION,
            player_id,
            name: name.clone(),
            seed: self.world.seed(),
            spawn: self.registry.spawn_position(),
            tick: self.tick,
            view_radius: self.settings.view_radius,
        });

        let here = ChunkCoord::containing(self.registry.spawn_position());
        let radius = self.settings.view_radius as u32;
        for other in self.registry.iter().filter(|p| p.id != player_id) {
            session.send(&Packet::PlayerJoined {
                player_id: other.id,
                name: other.name.clone(),
            });
            if within_view(here, ChunkCoord::containing(other.position), radius) {
                session.send(&player_state(other, self.tick));
            }
        }

        if let Some(announce) = frame(&Packet::PlayerJoined {
            player_id,
            name: name.clone(),
        }) {
            for other in self.sessions.values_mut() {
                other.send_frame(announce.clone());
            }
        }

        self.sessions.insert(player_id, session);
        moved.insert(player_id);
        report.joined.push(player_id);
        match peer {
            Some(peer) => info!("Player {player_id} ({name}) joined from {peer}"),
            None => info!("Player {player_id} ({name}) joined"),
        }
    }

    /// Drain every session's inbound queue. Returns the intents of sessions
    /// that stay open; intents of closing sessions are discarded.
    fn drain_inbound(&mut self, now: Instant) -> Vec<(PlayerId, Vec<QueuedIntent>)> {
        let mut batches = Vec::new();
        for (id, session) in self.sessions.iter_mut() {
            let mut intents = Vec::new();
            for _ in 0..self.settings.intent_queue_capacity {
                match session.inbound.try_recv() {
                    Ok(Inbound::Intent(intent)) => {
                        session.last_activity = now;
                        intents.push(intent);
                    }
                    Ok(Inbound::KeepAlive) => session.last_activity = now,
                    Ok(Inbound::Closed(reason)) => {
                        session.mark_closed(reason);
                        break;
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        session.mark_closed(CloseReason::ConnectionLost);
                        break;
                    }
                }
            }

            if now.saturating_duration_since(session.last_activity) > self.settings.idle_timeout {
                session.mark_closed(CloseReason::IdleTimeout);
            }

            if session.is_closing() {
                if !intents.is_empty() {
                    debug!(
                        "Discarding {} intents from closing player {id}",
                        intents.len()
                    );
                }
                continue;
            }
            if !intents.is_empty() {
                batches.push((*id, intents));
            }
        }
        batches
    }

    fn close_pending(&mut self, report: &mut TickReport) {
        loop {
            let closing: Vec<(PlayerId, CloseReason)> = self
                .sessions
                .iter()
                .filter_map(|(id, s)| s.pending_close.clone().map(|reason| (*id, reason)))
                .collect();
            if closing.is_empty() {
                return;
            }
            for (id, reason) in closing {
                self.close_session(id, reason, report);
            }
        }
    }

    fn close_session(&mut self, player_id: PlayerId, reason: CloseReason, report: &mut TickReport) {
        let Some(mut session) = self.sessions.remove(&player_id) else {
            return;
        };
        advance(&mut session.lifecycle, SessionState::Closing, player_id);

        match &reason {
            CloseReason::Overflow => {
                warn!("{}", ServerError::ResourceExhaustion { player_id });
            }
            CloseReason::IdleTimeout | CloseReason::Protocol(_) => {
                warn!("Closing player {player_id}: {}", reason.message());
            }
            _ => {}
        }
        if reason != CloseReason::ConnectionLost
            && let Some(bytes) = frame(&Packet::Disconnect {
                reason: reason.message(),
            })
        {
            session.outbox.send_final(bytes);
        }
        let _ = session.close.send(true);

        match self.registry.unregister(player_id) {
            Ok(player) => info!("Player {player_id} ({}) left: {}", player.name, reason.message()),
            Err(e) => warn!("{e}"),
        }
        if let Some(left) = frame(&Packet::PlayerLeft { player_id }) {
            for other in self.sessions.values_mut() {
                other.send_frame(left.clone());
            }
        }

        advance(&mut session.lifecycle, SessionState::Closed, player_id);
        report.closed.push((player_id, reason));
    }

    /// Flush backlogs and close sessions that stayed behind for too long.
    fn settle_outboxes(&mut self) {
        let grace = self.settings.overflow_grace_ticks;
        for session in self.sessions.values_mut() {
            if !session.outbox.flush() {
                session.mark_closed(CloseReason::ConnectionLost);
                continue;
            }
            if session.outbox.backlog_len() == 0 {
                session.overflow_ticks = 0;
                continue;
            }
            session.overflow_ticks += 1;
            if session.overflow_ticks >= grace || session.outbox.is_overflowing() {
                session.mark_closed(CloseReason::Overflow);
            }
        }
    }

    // ------------------------------------------------------------------
    // Intents
    // ------------------------------------------------------------------

    fn process_intents(
        &mut self,
        batches: Vec<(PlayerId, Vec<QueuedIntent>)>,
        report: &mut TickReport,
        moved: &mut BTreeSet<PlayerId>,
    ) {
        let mut touched = FxHashSet::default();
        for (player_id, intent) in merge_by_arrival(batches) {
            let Some(player) = self.registry.get(player_id) else {
                continue;
            };
            if intent.seq <= player.last_seq {
                trace!("Dropping duplicate seq {} from player {player_id}", intent.seq);
                report.duplicates += 1;
                continue;
            }
            if let Err(e) = self.registry.record_sequence(player_id, intent.seq) {
                warn!("{e}");
                continue;
            }

            match self.apply_intent(player_id, &intent, &mut touched, moved) {
                Ok(()) => report.accepted += 1,
                Err(ServerError::Validation(error)) => {
                    report.rejected += 1;
                    self.reject(player_id, &intent, &error);
                }
                Err(e) => warn!("Intent {} from player {player_id} failed: {e}", intent.seq),
            }
        }
    }

    fn apply_intent(
        &mut self,
        player_id: PlayerId,
        intent: &QueuedIntent,
        touched: &mut FxHashSet<BlockPos>,
        moved: &mut BTreeSet<PlayerId>,
    ) -> Result<(), ServerError> {
        let player = self
            .registry
            .get(player_id)
            .ok_or_else(|| ServerError::Fatal(format!("player {player_id} vanished mid-tick")))?;
        let rules = &self.settings.rules;

        match intent.kind {
            IntentKind::Move {
                position,
                orientation,
            } => {
                let remaining =
                    rules.check_move(&self.world, player, position, orientation, self.tick)?;
                self.registry
                    .apply_validated_move(player_id, position, orientation, self.tick, remaining)
                    .map_err(|e| ServerError::Fatal(e.to_string()))?;
                moved.insert(player_id);
            }
            IntentKind::SelectSlot { slot } => {
                rules.check_slot(slot)?;
                self.registry
                    .apply_validated_slot(player_id, slot)
                    .map_err(|e| ServerError::Fatal(e.to_string()))?;
                moved.insert(player_id);
            }
            IntentKind::Block { pos, action, block } => {
                let block = rules.check_block(
                    &mut self.world,
                    &self.registry,
                    touched,
                    player,
                    pos,
                    action,
                    block,
                )?;
                self.world.set_block(pos, block).map_err(|e| match e {
                    SetBlockError::OutOfBounds(pos) => ValidationError::OutOfBounds(pos),
                    SetBlockError::Immutable { current, .. } => ValidationError::IllegalBlock(current),
                })?;
                touched.insert(pos);
            }
        }
        Ok(())
    }

    /// Tell the player why, then resend the authoritative state it got wrong.
    ///
    /// A block resync only goes to a client that holds the target chunk, and
    /// reading it never stores a new chunk.
    fn reject(&mut self, player_id: PlayerId, intent: &QueuedIntent, error: &ValidationError) {
        debug!("Rejected seq {} from player {player_id}: {error}", intent.seq);
        let Some(session) = self.sessions.get_mut(&player_id) else {
            return;
        };
        let resync = match intent.kind {
            IntentKind::Block { pos, .. } => session
                .known_chunks
                .contains(&pos.chunk())
                .then(|| Packet::BlockDelta {
                    pos,
                    block: self.world.peek_block(pos),
                    tick: self.tick,
                }),
            IntentKind::Move { .. } | IntentKind::SelectSlot { .. } => self
                .registry
                .get(player_id)
                .map(|player| player_state(player, self.tick)),
        };
        session.send(&Packet::IntentRejected {
            seq: intent.seq,
            reason: error.reason(),
        });
        if let Some(packet) = resync {
            session.send(&packet);
        }
    }
}

/// Turn away a handshaken connection without registering it.
fn refuse(request: JoinRequest, reason: CloseReason) {
    let JoinRequest {
        connection_id,
        mut lifecycle,
        outbound,
        close,
        ..
    } = request;
    if let Some(bytes) = frame(&Packet::Disconnect {
        reason: reason.message(),
    }) {
        Outbox::new(outbound, 0).send_final(bytes);
    }
    let _ = close.send(true);
    for step in [SessionState::Closing, SessionState::Closed] {
        if let Err(e) = lifecycle.transition(step) {
            warn!("{connection_id:?}: {e}");
        }
    }
}

fn advance(lifecycle: &mut Lifecycle, to: SessionState, player_id: PlayerId) {
    if let Err(e) = lifecycle.transition(to) {
        warn!("Player {player_id}: {e}");
    }
}
