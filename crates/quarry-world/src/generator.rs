//! Deterministic procedural terrain.
//!
//! Heights come from multi-octave simplex fBm; decorations (trees) come from a
//! per-column ChaCha8 stream. Everything is a pure function of the world seed
//! and the chunk coordinate, so a client holding the seed regenerates exactly
//! the server's baseline.

use noise::{NoiseFn, Simplex};
use rand::Rng;

use crate::block::Block;
use crate::chunk::Chunk;
use crate::coords::{BlockPos, CHUNK_SIZE, ChunkCoord, LocalPos};
use crate::seed::{column_rng, noise_seed};

/// Shape parameters for terrain generation.
#[derive(Clone, Debug, PartialEq)]
pub struct TerrainParams {
    /// Mean surface height in blocks.
    pub base_height: i32,
    /// Maximum deviation from `base_height`.
    pub amplitude: f64,
    /// Number of noise octaves.
    pub octaves: u32,
    /// Frequency of the first octave (cycles per block).
    pub base_frequency: f64,
    /// Frequency multiplier between octaves.
    pub lacunarity: f64,
    /// Amplitude multiplier between octaves.
    pub persistence: f64,
    /// Columns whose surface is at or below this height get sand.
    pub sea_level: i32,
    /// Tree attempts per chunk column.
    pub trees_per_column: u32,
    /// Probability that a single attempt plants a tree.
    pub tree_chance: f64,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            base_height: 64,
            amplitude: 12.0,
            octaves: 4,
            base_frequency: 0.008,
            lacunarity: 2.0,
            persistence: 0.5,
            sea_level: 62,
            trees_per_column: 2,
            tree_chance: 0.5,
        }
    }
}

/// Number of dirt (or sand) layers directly below the surface block.
const SOIL_DEPTH: i32 = 3;

/// Trees are planted this far from the column edge so the canopy never
/// crosses into a neighbouring column.
const TREE_MARGIN: u8 = 2;

/// Tallest trunk a tree can grow.
const MAX_TRUNK: i32 = 5;

/// Highest a tree reaches above its ground block: trunk plus one canopy layer.
const MAX_TREE_RISE: i32 = MAX_TRUNK + 1;

/// Pure, seed-driven chunk generator.
#[derive(Clone)]
pub struct WorldGenerator {
    seed: u64,
    noise: Simplex,
    params: TerrainParams,
}

impl WorldGenerator {
    /// Creates a generator with default terrain parameters.
    pub fn new(seed: u64) -> Self {
        Self::with_params(seed, TerrainParams::default())
    }

    /// Creates a generator with custom terrain parameters.
    pub fn with_params(seed: u64, params: TerrainParams) -> Self {
        Self {
            seed,
            noise: Simplex::new(noise_seed(seed)),
            params,
        }
    }

    /// The world seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    /// Height of the topmost solid block in column `(x, z)`.
    pub fn surface_height(&self, x: i32, z: i32) -> i32 {
        let p = &self.params;
        let mut total = 0.0;
        let mut norm = 0.0;
        let mut frequency = p.base_frequency;
        let mut amplitude = 1.0;
        for _ in 0..p.octaves {
            total += self.noise.get([x as f64 * frequency, z as f64 * frequency]) * amplitude;
            norm += amplitude;
            frequency *= p.lacunarity;
            amplitude *= p.persistence;
        }
        let normalized = if norm > 0.0 { total / norm } else { 0.0 };
        (p.base_height + (normalized * p.amplitude).round() as i32).max(1)
    }

    /// Height of the highest non-air block in column `(x, z)`, trees
    /// included.
    pub fn column_top(&self, x: i32, z: i32) -> i32 {
        let surface = self.surface_height(x, z);
        let mut top = surface;
        let mut cached: Option<(ChunkCoord, Chunk)> = None;
        for y in (surface + 1)..=(surface + MAX_TREE_RISE) {
            let pos = BlockPos::new(x, y, z);
            let coord = pos.chunk();
            if cached.as_ref().is_none_or(|(c, _)| *c != coord) {
                cached = Some((coord, self.generate(coord)));
            }
            if let Some((_, chunk)) = &cached
                && !chunk.get(pos.local()).is_air()
            {
                top = y;
            }
        }
        top
    }

    /// Block at `(y)` in a column whose surface is `surface`, ignoring trees.
    fn layer_block(&self, y: i32, surface: i32) -> Block {
        let beach = surface <= self.params.sea_level;
        if y <= 0 {
            Block::Bedrock
        } else if y > surface {
            Block::Air
        } else if y == surface {
            if beach { Block::Sand } else { Block::Grass }
        } else if y > surface - 1 - SOIL_DEPTH {
            if beach { Block::Sand } else { Block::Dirt }
        } else {
            Block::Stone
        }
    }

    /// Generates the chunk at `coord`.
    pub fn generate(&self, coord: ChunkCoord) -> Chunk {
        let mut chunk = Chunk::new();
        let origin = coord.origin();
        let size = CHUNK_SIZE as u8;

        let mut surfaces = [[0i32; CHUNK_SIZE]; CHUNK_SIZE];
        for lx in 0..size {
            for lz in 0..size {
                let surface = self.surface_height(origin.x + lx as i32, origin.z + lz as i32);
                surfaces[lx as usize][lz as usize] = surface;
                for ly in 0..size {
                    let block = self.layer_block(origin.y + ly as i32, surface);
                    if block.is_air() {
                        continue;
                    }
                    if let Some(local) = LocalPos::new(lx, ly, lz) {
                        chunk.put(local, block);
                    }
                }
            }
        }

        self.plant_trees(&mut chunk, coord, &surfaces);
        chunk
    }

    /// Places this column's trees into `chunk`, clipped to its vertical span.
    fn plant_trees(
        &self,
        chunk: &mut Chunk,
        coord: ChunkCoord,
        surfaces: &[[i32; CHUNK_SIZE]; CHUNK_SIZE],
    ) {
        let mut rng = column_rng(self.seed, coord.x, coord.z);
        let low = CHUNK_SIZE as u8 - 1 - TREE_MARGIN;

        for _ in 0..self.params.trees_per_column {
            // Draw every value up front so the stream does not depend on
            // which vertical chunk is asking.
            let tx = rng.random_range(TREE_MARGIN..=low);
            let tz = rng.random_range(TREE_MARGIN..=low);
            let trunk = rng.random_range(4..=MAX_TRUNK);
            let planted = rng.random_bool(self.params.tree_chance);

            let ground = surfaces[tx as usize][tz as usize];
            if !planted || ground <= self.params.sea_level {
                continue;
            }

            let base = coord.origin();
            let trunk_x = base.x + tx as i32;
            let trunk_z = base.z + tz as i32;
            let top = ground + trunk;

            for (pos, block) in tree_blocks(trunk_x, trunk_z, ground, top) {
                if pos.chunk() != coord {
                    continue;
                }
                let local = pos.local();
                if block == Block::Leaves && !chunk.get(local).is_air() {
                    continue;
                }
                chunk.put(local, block);
            }
        }
    }
}

/// Blocks of a single tree, trunk last so it overwrites its own canopy.
fn tree_blocks(x: i32, z: i32, ground: i32, top: i32) -> Vec<(BlockPos, Block)> {
    let mut blocks = Vec::new();
    for y in (top - 2)..=(top + 1) {
        let radius: i32 = if y >= top { 1 } else { 2 };
        for dx in -radius..=radius {
            for dz in -radius..=radius {
                if dx.abs() == radius && dz.abs() == radius {
                    continue;
                }
                blocks.push((BlockPos::new(x + dx, y, z + dz), Block::Leaves));
            }
        }
    }
    for y in (ground + 1)..=top {
        blocks.push((BlockPos::new(x, y, z), Block::Log));
    }
    blocks
}

impl std::fmt::Debug for WorldGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldGenerator")
            .field("seed", &self.seed)
            .field("params", &self.params)
            .finish()
    }
}
