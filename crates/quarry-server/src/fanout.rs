//! Per-client delta computation.
//!
//! After a tick's intents are applied, every session receives the part of the
//! tick it can see: block deltas for chunks it already holds, newly streamed
//! chunks, and state for players inside its view radius. Each packet is
//! encoded once and the frame shared between recipients.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use bytes::Bytes;
use quarry_protocol::{ChunkBlocks, Packet, PlayerId};
use quarry_world::{BlockChange, ChunkCoord, WorldStore, chunk_coords_near};

use crate::registry::{Player, PlayerRegistry};
use crate::session::{Session, frame};

/// Parameters for one fan-out pass.
#[derive(Debug, Clone, Copy)]
pub struct FanOutParams {
    pub tick: u64,
    pub now: Instant,
    pub view_radius: u32,
    pub chunks_per_tick: usize,
    pub keepalive_interval: Duration,
}

/// Authoritative state packet for one player.
pub fn player_state(player: &Player, tick: u64) -> Packet {
    Packet::PlayerState {
        player_id: player.id,
        position: player.position,
        orientation: player.orientation,
        selected_slot: player.selected_slot,
        tick,
    }
}

/// Whether a target in `target` chunk is within `radius` of a viewer.
pub fn within_view(viewer: ChunkCoord, target: ChunkCoord, radius: u32) -> bool {
    viewer.chebyshev_distance(target) <= radius
}

/// Queues every session's share of the tick.
pub fn fan_out(
    world: &WorldStore,
    registry: &PlayerRegistry,
    sessions: &mut BTreeMap<PlayerId, Session>,
    changes: &[BlockChange],
    moved: &BTreeSet<PlayerId>,
    params: &FanOutParams,
) {
    let deltas: Vec<(ChunkCoord, Bytes)> = changes
        .iter()
        .filter_map(|change| {
            let packet = Packet::BlockDelta {
                pos: change.pos,
                block: change.block,
                tick: params.tick,
            };
            frame(&packet).map(|bytes| (change.pos.chunk(), bytes))
        })
        .collect();

    let states: Vec<(PlayerId, ChunkCoord, Bytes)> = moved
        .iter()
        .filter_map(|id| registry.get(*id))
        .filter_map(|player| {
            frame(&player_state(player, params.tick))
                .map(|bytes| (player.id, ChunkCoord::containing(player.position), bytes))
        })
        .collect();

    let keepalive = frame(&Packet::KeepAlive);

    for (id, session) in sessions.iter_mut() {
        if session.is_closing() {
            continue;
        }
        let Some(center) = registry
            .get(*id)
            .map(|player| ChunkCoord::containing(player.position))
        else {
            continue;
        };

        session
            .known_chunks
            .retain(|coord| within_view(center, *coord, params.view_radius));
        for (coord, bytes) in &deltas {
            if session.known_chunks.contains(coord) {
                session.send_frame(bytes.clone());
            }
        }
        stream_chunks(world, session, center, params.view_radius, params.chunks_per_tick);

        for (player_id, coord, bytes) in &states {
            if player_id != id && within_view(center, *coord, params.view_radius) {
                session.send_frame(bytes.clone());
            }
        }

        if let Some(bytes) = &keepalive
            && params.now.saturating_duration_since(session.last_keepalive) >= params.keepalive_interval
        {
            session.send_frame(bytes.clone());
            session.last_keepalive = params.now;
        }
    }
}

/// Sends up to `budget` chunks the session does not hold yet, nearest first,
/// and returns how many were sent.
///
/// A chunk the server never generated, or one still at version 0, goes out as
/// `ChunkStock`; modified chunks carry their full contents.
pub fn stream_chunks(
    world: &WorldStore,
    session: &mut Session,
    center: ChunkCoord,
    radius: u32,
    budget: usize,
) -> usize {
    if budget == 0 {
        return 0;
    }
    let bounds = world.bounds();
    let missing: Vec<ChunkCoord> = chunk_coords_near(center, radius, |coord| {
        bounds.contains_chunk(coord) && !session.known_chunks.contains(&coord)
    })
    .into_iter()
    .take(budget)
    .collect();

    for coord in &missing {
        let packet = match world.peek_chunk(*coord) {
            Some(chunk) if !chunk.is_stock() => Packet::WorldChunk {
                coord: *coord,
                blocks: ChunkBlocks::from_chunk(chunk),
            },
            _ => Packet::ChunkStock { coord: *coord },
        };
        session.send(&packet);
        session.known_chunks.insert(*coord);
    }
    missing.len()
}
