//! Fixed-size chunk storage with a version counter.
//!
//! Every mutation through [`Chunk::set`] bumps the version, so a chunk at
//! version 0 is exactly what the generator produced ("stock"). Generation
//! writes through a crate-private path that leaves the version untouched.

use crate::block::{Block, UnknownBlock};
use crate::coords::{CHUNK_VOLUME, LocalPos};

/// A 16×16×16 cube of blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Flat block array indexed by [`LocalPos::index`]; always `CHUNK_VOLUME` long.
    blocks: Box<[Block]>,
    /// Incremented on every effective mutation.
    version: u64,
}

impl Chunk {
    /// Creates a chunk filled with Air.
    pub fn new() -> Self {
        Self::new_filled(Block::Air)
    }

    /// Creates a chunk filled with the given block.
    pub fn new_filled(block: Block) -> Self {
        Self {
            blocks: vec![block; CHUNK_VOLUME].into_boxed_slice(),
            version: 0,
        }
    }

    /// Rebuilds a chunk from wire codes (x-major, then y, then z).
    ///
    /// The slice must be exactly [`CHUNK_VOLUME`] bytes; the first unknown
    /// code aborts the conversion.
    pub fn from_codes(codes: &[u8]) -> Result<Self, UnknownBlock> {
        debug_assert_eq!(codes.len(), CHUNK_VOLUME);
        let blocks = codes
            .iter()
            .map(|&code| Block::try_from(code))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            blocks: blocks.into_boxed_slice(),
            version: 0,
        })
    }

    /// Builds a stock chunk from a flat block slice; `None` if the slice is
    /// not exactly [`CHUNK_VOLUME`] long.
    pub fn from_blocks(blocks: &[Block]) -> Option<Self> {
        (blocks.len() == CHUNK_VOLUME).then(|| Self {
            blocks: blocks.into(),
            version: 0,
        })
    }

    /// Returns the block at `local`.
    #[inline]
    pub fn get(&self, local: LocalPos) -> Block {
        self.blocks[local.index()]
    }

    /// Sets the block at `local` and returns the previous one.
    ///
    /// The version is bumped only when the stored block actually changes.
    pub fn set(&mut self, local: LocalPos, block: Block) -> Block {
        let slot = &mut self.blocks[local.index()];
        let previous = *slot;
        if previous != block {
            *slot = block;
            self.version += 1;
        }
        previous
    }

    /// Generator write: no version bump.
    pub(crate) fn put(&mut self, local: LocalPos, block: Block) {
        self.blocks[local.index()] = block;
    }

    /// Current version counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// `true` while the chunk still equals its generated baseline.
    pub fn is_stock(&self) -> bool {
        self.version == 0
    }

    /// Flat view of all blocks.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Wire codes for every block, in index order.
    pub fn to_codes(&self) -> Vec<u8> {
        self.blocks.iter().map(|b| b.code()).collect()
    }

    /// Number of non-air blocks.
    pub fn solid_count(&self) -> usize {
        self.blocks.iter().filter(|b| !b.is_air()).count()
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(x: u8, y: u8, z: u8) -> LocalPos {
        LocalPos::new(x, y, z).expect("in range")
    }

    #[test]
    fn test_new_chunk_is_air_and_stock() {
        let chunk = Chunk::new();
        assert!(chunk.is_stock());
        assert_eq!(chunk.solid_count(), 0);
        assert_eq!(chunk.get(local(3, 4, 5)), Block::Air);
    }

    #[test]
    fn test_set_returns_previous_and_bumps_version() {
        let mut chunk = Chunk::new();
        let prev = chunk.set(local(1, 2, 3), Block::Stone);
        assert_eq!(prev, Block::Air);
        assert_eq!(chunk.version(), 1);
        assert_eq!(chunk.get(local(1, 2, 3)), Block::Stone);
        assert!(!chunk.is_stock());
    }

    #[test]
    fn test_same_value_set_does_not_bump_version() {
        let mut chunk = Chunk::new_filled(Block::Dirt);
        chunk.set(local(0, 0, 0), Block::Dirt);
        assert_eq!(chunk.version(), 0);
    }

    #[test]
    fn test_put_leaves_version_untouched() {
        let mut chunk = Chunk::new();
        chunk.put(local(0, 0, 0), Block::Bedrock);
        assert!(chunk.is_stock());
        assert_eq!(chunk.get(local(0, 0, 0)), Block::Bedrock);
    }

    #[test]
    fn test_codes_roundtrip() {
        let mut chunk = Chunk::new();
        chunk.put(local(15, 15, 15), Block::Leaves);
        chunk.put(local(0, 7, 2), Block::Sand);
        let rebuilt = Chunk::from_codes(&chunk.to_codes()).unwrap();
        assert_eq!(rebuilt, chunk);
    }

    #[test]
    fn test_from_codes_rejects_unknown() {
        let mut codes = vec![0u8; CHUNK_VOLUME];
        codes[100] = 200;
        assert_eq!(Chunk::from_codes(&codes), Err(UnknownBlock(200)));
    }
}
