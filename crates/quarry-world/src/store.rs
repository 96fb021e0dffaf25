//! Authoritative chunk map with lazy generation and per-tick change tracking.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::block::Block;
use crate::chunk::Chunk;
use crate::coords::{BlockPos, CHUNK_SIZE, ChunkCoord, chunk_coords_near};
use crate::generator::WorldGenerator;

/// Limits of the playable volume. Y is half-open `[min_y, max_y)`; X and Z
/// must satisfy `|v| < horizontal_limit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorldBounds {
    pub min_y: i32,
    pub max_y: i32,
    pub horizontal_limit: i32,
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self {
            min_y: 0,
            max_y: 256,
            horizontal_limit: 65_536,
        }
    }
}

impl WorldBounds {
    /// Whether a block position lies inside the world.
    pub fn contains(&self, pos: BlockPos) -> bool {
        pos.y >= self.min_y
            && pos.y < self.max_y
            && pos.x.unsigned_abs() < self.horizontal_limit.unsigned_abs()
            && pos.z.unsigned_abs() < self.horizontal_limit.unsigned_abs()
    }

    /// Whether any block of the chunk lies inside the world.
    pub fn contains_chunk(&self, coord: ChunkCoord) -> bool {
        let origin = coord.origin();
        let size = CHUNK_SIZE as i32;
        let limit = self.horizontal_limit;
        origin.y < self.max_y
            && origin.y + size > self.min_y
            && origin.x < limit
            && origin.x + size > -limit
            && origin.z < limit
            && origin.z + size > -limit
    }
}

/// Why a block write was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetBlockError {
    #[error("block position {0:?} is outside the world bounds")]
    OutOfBounds(BlockPos),
    #[error("{current} at {pos:?} cannot be modified")]
    Immutable { pos: BlockPos, current: Block },
}

/// One applied block write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockChange {
    pub pos: BlockPos,
    pub previous: Block,
    pub block: Block,
}

/// The world: every chunk that has been touched, plus the writes made since
/// the last [`WorldStore::take_changes`].
#[derive(Debug)]
pub struct WorldStore {
    generator: WorldGenerator,
    bounds: WorldBounds,
    chunks: FxHashMap<ChunkCoord, Chunk>,
    changes: Vec<BlockChange>,
}

impl WorldStore {
    pub fn new(generator: WorldGenerator, bounds: WorldBounds) -> Self {
        Self {
            generator,
            bounds,
            chunks: FxHashMap::default(),
            changes: Vec::new(),
        }
    }

    pub fn generator(&self) -> &WorldGenerator {
        &self.generator
    }

    pub fn bounds(&self) -> WorldBounds {
        self.bounds
    }

    /// The world seed.
    pub fn seed(&self) -> u64 {
        self.generator.seed()
    }

    /// Returns the chunk at `coord`, generating it on first access.
    pub fn chunk(&mut self, coord: ChunkCoord) -> &Chunk {
        let generator = &self.generator;
        self.chunks.entry(coord).or_insert_with(|| {
            tracing::trace!("Generating chunk {coord:?}");
            generator.generate(coord)
        })
    }

    fn chunk_mut(&mut self, coord: ChunkCoord) -> &mut Chunk {
        let generator = &self.generator;
        self.chunks
            .entry(coord)
            .or_insert_with(|| generator.generate(coord))
    }

    /// Returns the chunk at `coord` only if it already exists.
    pub fn peek_chunk(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.chunks.get(&coord)
    }

    /// Reads a block. Positions outside the bounds read as Air without
    /// generating anything.
    pub fn get_block(&mut self, pos: BlockPos) -> Block {
        if !self.bounds.contains(pos) {
            return Block::Air;
        }
        self.chunk(pos.chunk()).get(pos.local())
    }

    /// Reads a block without storing anything: a chunk that does not exist
    /// yet is generated into a temporary and dropped.
    pub fn peek_block(&self, pos: BlockPos) -> Block {
        if !self.bounds.contains(pos) {
            return Block::Air;
        }
        let coord = pos.chunk();
        match self.peek_chunk(coord) {
            Some(chunk) => chunk.get(pos.local()),
            None => self.generator.generate(coord).get(pos.local()),
        }
    }

    /// Writes a block and returns the one it replaced.
    ///
    /// Writing the current value is a no-op: no version bump and no change
    /// record.
    pub fn set_block(&mut self, pos: BlockPos, block: Block) -> Result<Block, SetBlockError> {
        if !self.bounds.contains(pos) {
            return Err(SetBlockError::OutOfBounds(pos));
        }
        let chunk = self.chunk_mut(pos.chunk());
        let local = pos.local();
        let current = chunk.get(local);
        if current == block {
            return Ok(current);
        }
        if current == Block::Bedrock {
            return Err(SetBlockError::Immutable { pos, current });
        }
        let previous = chunk.set(local, block);
        self.changes.push(BlockChange {
            pos,
            previous,
            block,
        });
        Ok(previous)
    }

    /// Drains the writes recorded since the previous call, in write order.
    pub fn take_changes(&mut self) -> Vec<BlockChange> {
        std::mem::take(&mut self.changes)
    }

    /// Number of chunks generated so far.
    pub fn generated_count(&self) -> usize {
        self.chunks.len()
    }

    /// Snapshots of the in-bounds chunks within `radius` of `center`, nearest
    /// first. Chunks are generated as the iterator reaches them.
    pub fn chunks_near(&mut self, center: ChunkCoord, radius: u32) -> ChunksNear<'_> {
        let bounds = self.bounds;
        let coords = chunk_coords_near(center, radius, |c| bounds.contains_chunk(c));
        ChunksNear {
            store: self,
            coords: coords.into_iter(),
        }
    }
}

/// Iterator returned by [`WorldStore::chunks_near`].
pub struct ChunksNear<'a> {
    store: &'a mut WorldStore,
    coords: std::vec::IntoIter<ChunkCoord>,
}

impl Iterator for ChunksNear<'_> {
    type Item = (ChunkCoord, Chunk);

    fn next(&mut self) -> Option<Self::Item> {
        let coord = self.coords.next()?;
        Some((coord, self.store.chunk(coord).clone()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.coords.size_hint()
    }
}

impl ExactSizeIterator for ChunksNear<'_> {}
