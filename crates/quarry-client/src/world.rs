//! Client-side mirror of the server's world and player list.

use quarry_protocol::{Orientation, Packet, PlayerId};
use quarry_world::{Block, BlockPos, Chunk, ChunkCoord, WorldGenerator};
use rustc_hash::FxHashMap;

/// A remote player as last reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    pub name: String,
    pub position: [f32; 3],
    pub orientation: Orientation,
    pub selected_slot: u8,
}

/// Something that changed in the mirror after applying a packet.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    ChunkLoaded { coord: ChunkCoord, stock: bool },
    BlockChanged { pos: BlockPos, block: Block, tick: u64 },
    PlayerJoined { player_id: PlayerId, name: String },
    PlayerMoved { player_id: PlayerId, position: [f32; 3] },
    PlayerLeft { player_id: PlayerId },
    Rejected { seq: u32, reason: String },
}

/// Chunks and players known to this client.
///
/// Stock chunks are regenerated from the session seed, so the mirror must
/// be built with the same seed the server reported in `HandshakeAck`.
pub struct LocalWorld {
    generator: WorldGenerator,
    chunks: FxHashMap<ChunkCoord, Chunk>,
    players: FxHashMap<PlayerId, RemotePlayer>,
    local_player: PlayerId,
}

impl LocalWorld {
    pub fn new(seed: u64, local_player: PlayerId) -> Self {
        Self {
            generator: WorldGenerator::new(seed),
            chunks: FxHashMap::default(),
            players: FxHashMap::default(),
            local_player,
        }
    }

    /// Fold one server packet into the mirror.
    ///
    /// Returns `None` for packets that carry nothing to mirror, and for
    /// deltas that land in chunks this client was never sent.
    pub fn apply(&mut self, packet: &Packet) -> Option<WorldEvent> {
        match packet {
            Packet::ChunkStock { coord } => {
                self.chunks.insert(*coord, self.generator.generate(*coord));
                Some(WorldEvent::ChunkLoaded {
                    coord: *coord,
                    stock: true,
                })
            }
            Packet::WorldChunk { coord, blocks } => {
                self.chunks.insert(*coord, blocks.to_chunk());
                Some(WorldEvent::ChunkLoaded {
                    coord: *coord,
                    stock: false,
                })
            }
            Packet::BlockDelta { pos, block, tick } => {
                let chunk = self.chunks.get_mut(&pos.chunk())?;
                chunk.set(pos.local(), *block);
                Some(WorldEvent::BlockChanged {
                    pos: *pos,
                    block: *block,
                    tick: *tick,
                })
            }
            Packet::PlayerJoined { player_id, name } => {
                self.players.insert(*player_id, RemotePlayer {
                    name: name.clone(),
                    position: [0.0; 3],
                    orientation: Orientation::default(),
                    selected_slot: 0,
                });
                Some(WorldEvent::PlayerJoined {
                    player_id: *player_id,
                    name: name.clone(),
                })
            }
            Packet::PlayerState {
                player_id,
                position,
                orientation,
                selected_slot,
                ..
            } => {
                let player = self.players.get_mut(player_id)?;
                player.position = *position;
                player.orientation = *orientation;
                player.selected_slot = *selected_slot;
                Some(WorldEvent::PlayerMoved {
                    player_id: *player_id,
                    position: *position,
                })
            }
            Packet::PlayerLeft { player_id } => {
                self.players.remove(player_id)?;
                Some(WorldEvent::PlayerLeft {
                    player_id: *player_id,
                })
            }
            Packet::IntentRejected { seq, reason } => Some(WorldEvent::Rejected {
                seq: *seq,
                reason: reason.to_string(),
            }),
            _ => None,
        }
    }

    /// Block at `pos`, or `None` if its chunk is not loaded.
    pub fn block(&self, pos: BlockPos) -> Option<Block> {
        self.chunks.get(&pos.chunk()).map(|c| c.get(pos.local()))
    }

    pub fn has_chunk(&self, coord: ChunkCoord) -> bool {
        self.chunks.contains_key(&coord)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Other players, keyed by id. Never contains the local player unless
    /// the server announced it.
    pub fn players(&self) -> &FxHashMap<PlayerId, RemotePlayer> {
        &self.players
    }

    pub fn local_player(&self) -> PlayerId {
        self.local_player
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_protocol::{ChunkBlocks, RejectReason};

    #[test]
    fn test_stock_chunk_matches_generator() {
        let mut world = LocalWorld::new(42, 1);
        let coord = ChunkCoord::new(0, 4, 0);
        let event = world.apply(&Packet::ChunkStock { coord });
        assert_eq!(event, Some(WorldEvent::ChunkLoaded { coord, stock: true }));

        let expected = WorldGenerator::new(42).generate(coord);
        let pos = coord.origin();
        assert_eq!(world.block(pos), Some(expected.get(pos.local())));
    }

    #[test]
    fn test_world_chunk_replaces_contents() {
        let mut world = LocalWorld::new(42, 1);
        let coord = ChunkCoord::new(1, 0, 1);
        let chunk = Chunk::new_filled(Block::Sand);
        world.apply(&Packet::WorldChunk {
            coord,
            blocks: ChunkBlocks::from_chunk(&chunk),
        });
        assert_eq!(world.block(coord.origin()), Some(Block::Sand));
        assert_eq!(world.chunk_count(), 1);
    }

    #[test]
    fn test_delta_needs_loaded_chunk() {
        let mut world = LocalWorld::new(42, 1);
        let pos = BlockPos::new(3, 200, 3);
        let delta = Packet::BlockDelta {
            pos,
            block: Block::Stone,
            tick: 9,
        };
        assert_eq!(world.apply(&delta), None);
        assert_eq!(world.block(pos), None);

        world.apply(&Packet::ChunkStock { coord: pos.chunk() });
        assert_eq!(world.block(pos), Some(Block::Air));
        assert!(world.apply(&delta).is_some());
        assert_eq!(world.block(pos), Some(Block::Stone));
    }

    #[test]
    fn test_player_lifecycle() {
        let mut world = LocalWorld::new(42, 1);
        assert_eq!(world.local_player(), 1);
        world.apply(&Packet::PlayerJoined {
            player_id: 2,
            name: "bob".to_string(),
        });
        let moved = world.apply(&Packet::PlayerState {
            player_id: 2,
            position: [1.0, 70.0, 1.0],
            orientation: Orientation::default(),
            selected_slot: 3,
            tick: 5,
        });
        assert!(matches!(moved, Some(WorldEvent::PlayerMoved { player_id: 2, .. })));
        assert_eq!(world.players()[&2].selected_slot, 3);

        assert!(world.apply(&Packet::PlayerLeft { player_id: 2 }).is_some());
        assert!(world.players().is_empty());
        assert_eq!(world.apply(&Packet::PlayerLeft { player_id: 2 }), None);
    }

    #[test]
    fn test_rejection_surfaces_reason() {
        let mut world = LocalWorld::new(42, 1);
        let event = world.apply(&Packet::IntentRejected {
            seq: 7,
            reason: RejectReason::Occupied,
        });
        assert!(matches!(event, Some(WorldEvent::Rejected { seq: 7, .. })));
        assert_eq!(world.apply(&Packet::KeepAlive), None);
    }
}
