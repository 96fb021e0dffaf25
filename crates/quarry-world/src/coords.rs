//! Block and chunk coordinate types.
//!
//! World space is an integer block grid. Chunks are 16×16×16 cubes addressed by
//! [`ChunkCoord`]; the conversion uses floor division so negative coordinates
//! land in the correct chunk.

/// Side length of a chunk in blocks.
pub const CHUNK_SIZE: usize = 16;

/// Number of blocks in a chunk (16³).
pub const CHUNK_VOLUME: usize = CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE;

const CHUNK_SIZE_I32: i32 = CHUNK_SIZE as i32;

/// Absolute position of a block in the world grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockPos {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate (up).
    pub y: i32,
    /// Z coordinate.
    pub z: i32,
}

impl BlockPos {
    /// Creates a new block position.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The chunk containing this block.
    pub fn chunk(self) -> ChunkCoord {
        ChunkCoord::new(
            self.x.div_euclid(CHUNK_SIZE_I32),
            self.y.div_euclid(CHUNK_SIZE_I32),
            self.z.div_euclid(CHUNK_SIZE_I32),
        )
    }

    /// Position of this block inside its chunk.
    pub fn local(self) -> LocalPos {
        LocalPos {
            x: self.x.rem_euclid(CHUNK_SIZE_I32) as u8,
            y: self.y.rem_euclid(CHUNK_SIZE_I32) as u8,
            z: self.z.rem_euclid(CHUNK_SIZE_I32) as u8,
        }
    }

    /// Centre of the block cell in continuous world space.
    pub fn center(self) -> [f32; 3] {
        [
            self.x as f32 + 0.5,
            self.y as f32 + 0.5,
            self.z as f32 + 0.5,
        ]
    }

    /// The block cell containing a continuous world position.
    pub fn containing(position: [f32; 3]) -> Self {
        Self::new(
            position[0].floor() as i32,
            position[1].floor() as i32,
            position[2].floor() as i32,
        )
    }
}

/// Address of a chunk in the chunk grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    /// Chunk-grid X coordinate.
    pub x: i32,
    /// Chunk-grid Y coordinate.
    pub y: i32,
    /// Chunk-grid Z coordinate.
    pub z: i32,
}

impl ChunkCoord {
    /// Creates a new chunk coordinate.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns the coordinate offset by `(dx, dy, dz)` chunks.
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// World position of the chunk's minimum corner block.
    pub fn origin(self) -> BlockPos {
        BlockPos::new(
            self.x * CHUNK_SIZE_I32,
            self.y * CHUNK_SIZE_I32,
            self.z * CHUNK_SIZE_I32,
        )
    }

    /// Absolute world position of a local cell in this chunk.
    pub fn block_at(self, local: LocalPos) -> BlockPos {
        let origin = self.origin();
        BlockPos::new(
            origin.x + local.x as i32,
            origin.y + local.y as i32,
            origin.z + local.z as i32,
        )
    }

    /// Largest per-axis distance to `other`, in chunks.
    pub fn chebyshev_distance(self, other: ChunkCoord) -> u32 {
        let dx = self.x.abs_diff(other.x);
        let dy = self.y.abs_diff(other.y);
        let dz = self.z.abs_diff(other.z);
        dx.max(dy).max(dz)
    }

    /// The chunk containing a continuous world position.
    pub fn containing(position: [f32; 3]) -> Self {
        BlockPos::containing(position).chunk()
    }
}

/// Position of a block inside a chunk, each axis in `0..16`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocalPos {
    /// Local X.
    pub x: u8,
    /// Local Y.
    pub y: u8,
    /// Local Z.
    pub z: u8,
}

impl LocalPos {
    /// Creates a local position, or `None` if any axis is `>= 16`.
    pub fn new(x: u8, y: u8, z: u8) -> Option<Self> {
        let size = CHUNK_SIZE as u8;
        (x < size && y < size && z < size).then_some(Self { x, y, z })
    }

    /// Index into the flat chunk array: x-major, then y, then z.
    #[inline]
    pub fn index(self) -> usize {
        (self.x as usize * CHUNK_SIZE + self.y as usize) * CHUNK_SIZE + self.z as usize
    }

    /// Inverse of [`LocalPos::index`].
    pub fn from_index(index: usize) -> Self {
        debug_assert!(index < CHUNK_VOLUME);
        Self {
            x: (index / (CHUNK_SIZE * CHUNK_SIZE)) as u8,
            y: ((index / CHUNK_SIZE) % CHUNK_SIZE) as u8,
            z: (index % CHUNK_SIZE) as u8,
        }
    }
}

/// All chunk coordinates within `radius` (Chebyshev) of `center`, nearest
/// first.
///
/// Ties are broken by coordinate order so the sequence is the same on every
/// call. `keep` filters out coordinates the caller cannot serve (e.g. outside
/// the world bounds).
pub fn chunk_coords_near(
    center: ChunkCoord,
    radius: u32,
    keep: impl Fn(ChunkCoord) -> bool,
) -> Vec<ChunkCoord> {
    let r = radius as i32;
    let mut coords = Vec::new();
    for dx in -r..=r {
        for dy in -r..=r {
            for dz in -r..=r {
                let coord = center.offset(dx, dy, dz);
                if keep(coord) {
                    coords.push(coord);
                }
            }
        }
    }
    coords.sort_by_key(|c| {
        let dx = (c.x - center.x) as i64;
        let dy = (c.y - center.y) as i64;
        let dz = (c.z - center.z) as i64;
        (dx * dx + dy * dy + dz * dz, *c)
    });
    coords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_positions_floor_into_chunks() {
        let pos = BlockPos::new(-1, -17, 15);
        assert_eq!(pos.chunk(), ChunkCoord::new(-1, -2, 0));
        let local = pos.local();
        assert_eq!((local.x, local.y, local.z), (15, 15, 15));
    }

    #[test]
    fn test_block_at_inverts_chunk_and_local() {
        for pos in [
            BlockPos::new(0, 0, 0),
            BlockPos::new(-33, 70, 12),
            BlockPos::new(1000, -5, -1000),
        ] {
            assert_eq!(pos.chunk().block_at(pos.local()), pos);
        }
    }

    #[test]
    fn test_local_index_roundtrip() {
        for index in [0, 1, 15, 16, 255, 256, 4095] {
            assert_eq!(LocalPos::from_index(index).index(), index);
        }
        assert_eq!(LocalPos::new(1, 0, 0).map(LocalPos::index), Some(256));
        assert!(LocalPos::new(16, 0, 0).is_none());
    }

    #[test]
    fn test_containing_position() {
        assert_eq!(
            ChunkCoord::containing([-0.5, 64.2, 16.0]),
            ChunkCoord::new(-1, 4, 1)
        );
    }

    #[test]
    fn test_chebyshev_distance() {
        let a = ChunkCoord::new(0, 0, 0);
        assert_eq!(a.chebyshev_distance(ChunkCoord::new(3, -1, 2)), 3);
        assert_eq!(a.chebyshev_distance(a), 0);
    }

    #[test]
    fn test_coords_near_nearest_first_and_filtered() {
        let center = ChunkCoord::new(0, 4, 0);
        let coords = chunk_coords_near(center, 1, |c| c.y >= 4);
        assert_eq!(coords.first(), Some(&center));
        assert_eq!(coords.len(), 18);
        assert!(coords.iter().all(|c| c.y >= 4));

        // Same input, same order.
        assert_eq!(coords, chunk_coords_near(center, 1, |c| c.y >= 4));
    }
}
