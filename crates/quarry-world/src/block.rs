//! Block types stored in every voxel cell.
//!
//! A [`Block`] is a plain value: one byte on the wire and in chunk storage.
//! Air is always code 0 so that an all-zero chunk is empty space.

use thiserror::Error;

/// The kind of block occupying a single cell of the world grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Block {
    /// Empty space.
    #[default]
    Air = 0,
    /// Surface block above sea level.
    Grass = 1,
    /// Sub-surface soil.
    Dirt = 2,
    /// Bulk terrain.
    Stone = 3,
    /// Surface and soil at or below sea level.
    Sand = 4,
    /// Tree trunk.
    Log = 5,
    /// Tree canopy.
    Leaves = 6,
    /// Indestructible floor of the world.
    Bedrock = 7,
}

/// Returned when a byte does not name a known [`Block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown block code {0}")]
pub struct UnknownBlock(pub u8);

impl Block {
    /// Every block type, ordered by code.
    pub const ALL: [Block; 8] = [
        Block::Air,
        Block::Grass,
        Block::Dirt,
        Block::Stone,
        Block::Sand,
        Block::Log,
        Block::Leaves,
        Block::Bedrock,
    ];

    /// Wire / storage code of this block.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Looks up a block by its code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Returns `true` for empty space.
    #[inline]
    pub fn is_air(self) -> bool {
        self == Block::Air
    }

    /// Whether a player may place this block.
    pub fn is_placeable(self) -> bool {
        !matches!(self, Block::Air | Block::Bedrock)
    }

    /// Whether a player may break this block.
    pub fn is_breakable(self) -> bool {
        !matches!(self, Block::Air | Block::Bedrock)
    }

    /// Lowercase name, used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Block::Air => "air",
            Block::Grass => "grass",
            Block::Dirt => "dirt",
            Block::Stone => "stone",
            Block::Sand => "sand",
            Block::Log => "log",
            Block::Leaves => "leaves",
            Block::Bedrock => "bedrock",
        }
    }
}

impl TryFrom<u8> for Block {
    type Error = UnknownBlock;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Block::from_code(code).ok_or(UnknownBlock(code))
    }
}

impl From<Block> for u8 {
    fn from(block: Block) -> Self {
        block.code()
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_air_is_code_zero() {
        assert_eq!(Block::Air.code(), 0);
        assert_eq!(Block::default(), Block::Air);
    }

    #[test]
    fn test_codes_match_table_order() {
        for (i, block) in Block::ALL.iter().enumerate() {
            assert_eq!(block.code() as usize, i);
            assert_eq!(Block::from_code(i as u8), Some(*block));
        }
    }

    #[test]
    fn test_unknown_code_rejected() {
        assert_eq!(Block::try_from(8), Err(UnknownBlock(8)));
        assert_eq!(Block::try_from(255), Err(UnknownBlock(255)));
    }

    #[test]
    fn test_base_codes_are_stable() {
        assert_eq!(Block::Grass.code(), 1);
        assert_eq!(Block::Dirt.code(), 2);
        assert_eq!(Block::Stone.code(), 3);
    }

    #[test]
    fn test_legality_flags() {
        assert!(!Block::Air.is_placeable());
        assert!(!Block::Bedrock.is_placeable());
        assert!(!Block::Bedrock.is_breakable());
        assert!(!Block::Air.is_breakable());
        assert!(Block::Stone.is_placeable());
        assert!(Block::Leaves.is_breakable());
    }
}
