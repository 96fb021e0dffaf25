//! Deterministic seed derivation.
//!
//! Server and clients must produce the same terrain from the same world seed,
//! so every derived value goes through a fixed 64-bit mixer rather than std's
//! hasher (whose output is not guaranteed across Rust releases).

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::chunk::Chunk;

/// SplitMix64 finaliser: a well-distributed bijection on `u64`.
#[inline]
pub fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed for a chunk column (all chunks sharing `x`/`z`).
pub fn derive_column_seed(world_seed: u64, chunk_x: i32, chunk_z: i32) -> u64 {
    let a = mix64(world_seed ^ mix64(chunk_x as u32 as u64));
    mix64(a ^ (chunk_z as u32 as u64).rotate_left(32))
}

/// Deterministic RNG for decorations in one chunk column.
pub fn column_rng(world_seed: u64, chunk_x: i32, chunk_z: i32) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(derive_column_seed(world_seed, chunk_x, chunk_z))
}

/// 32-bit seed for the noise functions.
pub fn noise_seed(world_seed: u64) -> u32 {
    let mixed = mix64(world_seed);
    (mixed ^ (mixed >> 32)) as u32
}

/// Content digest of a chunk, for determinism checks.
pub fn hash_chunk(chunk: &Chunk) -> u64 {
    chunk
        .blocks()
        .iter()
        .fold(0xCBF2_9CE4_8422_2325, |acc, block| {
            mix64(acc ^ block.code() as u64)
        })
}
