//! Voxel world storage: block types, chunk grid, deterministic terrain generation,
//! and the lazily-populated world store.

pub mod block;
pub mod chunk;
pub mod coords;
pub mod generator;
pub mod seed;
pub mod store;

pub use block::{Block, UnknownBlock};
pub use chunk::Chunk;
pub use coords::{BlockPos, CHUNK_SIZE, CHUNK_VOLUME, ChunkCoord, LocalPos, chunk_coords_near};
pub use generator::{TerrainParams, WorldGenerator};
pub use store::{BlockChange, ChunksNear, SetBlockError, WorldBounds, WorldStore};
