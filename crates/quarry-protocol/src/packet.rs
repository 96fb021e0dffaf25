//! Logical packet model shared by server and client.

use quarry_world::{Block, CHUNK_VOLUME, Chunk, ChunkCoord, BlockPos, UnknownBlock};

/// Protocol version carried in `Handshake` and `HandshakeAck`.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest allowed frame body (kind byte plus payload).
pub const MAX_FRAME_LEN: u32 = 65_536;

/// Largest allowed string field, in UTF-8 bytes.
pub const MAX_STRING_LEN: usize = 64;

/// Largest allowed skin blob.
pub const MAX_SKIN_LEN: usize = 1024;

/// Server-assigned player identifier.
pub type PlayerId = u32;

/// Packet kind bytes.
pub mod kind {
    pub const HANDSHAKE: u8 = 1;
    pub const HANDSHAKE_ACK: u8 = 2;
    pub const WORLD_CHUNK: u8 = 3;
    pub const CHUNK_STOCK: u8 = 4;
    pub const BLOCK_DELTA: u8 = 5;
    pub const MOVE_INTENT: u8 = 6;
    pub const BLOCK_INTENT: u8 = 7;
    pub const SELECT_SLOT_INTENT: u8 = 8;
    pub const PLAYER_STATE: u8 = 9;
    pub const PLAYER_JOINED: u8 = 10;
    pub const PLAYER_LEFT: u8 = 11;
    pub const INTENT_REJECTED: u8 = 12;
    pub const DISCONNECT: u8 = 13;
    pub const KEEP_ALIVE: u8 = 14;
}

/// Look direction in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Orientation {
    pub yaw: f32,
    pub pitch: f32,
}

impl Orientation {
    pub const fn new(yaw: f32, pitch: f32) -> Self {
        Self { yaw, pitch }
    }
}

/// What a `BlockIntent` asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockAction {
    Break = 0,
    Place = 1,
}

impl BlockAction {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Break),
            1 => Some(Self::Place),
            _ => None,
        }
    }
}

/// Why the server refused an intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RejectReason {
    TooFast = 1,
    OutOfReach = 2,
    OutOfBounds = 3,
    IllegalBlock = 4,
    StateChanged = 5,
    Occupied = 6,
    Obstructed = 7,
    InvalidSlot = 8,
    InvalidMove = 9,
}

impl RejectReason {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::TooFast,
            2 => Self::OutOfReach,
            3 => Self::OutOfBounds,
            4 => Self::IllegalBlock,
            5 => Self::StateChanged,
            6 => Self::Occupied,
            7 => Self::Obstructed,
            8 => Self::InvalidSlot,
            9 => Self::InvalidMove,
            _ => return None,
        })
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::TooFast => "moved too fast",
            Self::OutOfReach => "target out of reach",
            Self::OutOfBounds => "target out of bounds",
            Self::IllegalBlock => "illegal block",
            Self::StateChanged => "state changed",
            Self::Occupied => "target occupied",
            Self::Obstructed => "obstructed by a player",
            Self::InvalidSlot => "invalid hotbar slot",
            Self::InvalidMove => "invalid move",
        };
        f.write_str(text)
    }
}

/// Full block contents of one chunk, always exactly [`CHUNK_VOLUME`] entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkBlocks(Box<[Block]>);

impl ChunkBlocks {
    /// Copies the blocks out of a chunk.
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self(chunk.blocks().into())
    }

    /// Parses wire codes; `None` when the length is wrong.
    pub(crate) fn from_codes(codes: &[u8]) -> Option<Result<Self, UnknownBlock>> {
        if codes.len() != CHUNK_VOLUME {
            return None;
        }
        Some(
            codes
                .iter()
                .map(|&c| Block::try_from(c))
                .collect::<Result<Vec<_>, _>>()
                .map(|blocks| Self(blocks.into_boxed_slice())),
        )
    }

    pub fn blocks(&self) -> &[Block] {
        &self.0
    }

    /// Rebuilds a [`Chunk`]. Its version starts at zero on the receiving side.
    pub fn to_chunk(&self) -> Chunk {
        Chunk::from_blocks(&self.0).unwrap_or_default()
    }
}

/// Every message that crosses the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Handshake {
        version: u8,
        name: String,
        skin: Option<Vec<u8>>,
    },
    HandshakeAck {
        version: u8,
        player_id: PlayerId,
        name: String,
        seed: u64,
        spawn: [f32; 3],
        tick: u64,
        view_radius: u8,
    },
    WorldChunk {
        coord: ChunkCoord,
        blocks: ChunkBlocks,
    },
    /// The chunk equals the generator output; regenerate it from the seed.
    ChunkStock {
        coord: ChunkCoord,
    },
    BlockDelta {
        pos: BlockPos,
        block: Block,
        tick: u64,
    },
    MoveIntent {
        seq: u32,
        position: [f32; 3],
        orientation: Orientation,
    },
    /// For a break, `block` is the block the client expects to remove, or
    /// Air to accept whatever is there.
    BlockIntent {
        seq: u32,
        pos: BlockPos,
        action: BlockAction,
        block: Block,
    },
    SelectSlotIntent {
        seq: u32,
        slot: u8,
    },
    PlayerState {
        player_id: PlayerId,
        position: [f32; 3],
        orientation: Orientation,
        selected_slot: u8,
        tick: u64,
    },
    PlayerJoined {
        player_id: PlayerId,
        name: String,
    },
    PlayerLeft {
        player_id: PlayerId,
    },
    IntentRejected {
        seq: u32,
        reason: RejectReason,
    },
    Disconnect {
        reason: String,
    },
    KeepAlive,
}

impl Packet {
    /// Wire kind byte.
    pub fn kind(&self) -> u8 {
        match self {
            Packet::Handshake { .. } => kind::HANDSHAKE,
            Packet::HandshakeAck { .. } => kind::HANDSHAKE_ACK,
            Packet::WorldChunk { .. } => kind::WORLD_CHUNK,
            Packet::ChunkStock { .. } => kind::CHUNK_STOCK,
            Packet::BlockDelta { .. } => kind::BLOCK_DELTA,
            Packet::MoveIntent { .. } => kind::MOVE_INTENT,
            Packet::BlockIntent { .. } => kind::BLOCK_INTENT,
            Packet::SelectSlotIntent { .. } => kind::SELECT_SLOT_INTENT,
            Packet::PlayerState { .. } => kind::PLAYER_STATE,
            Packet::PlayerJoined { .. } => kind::PLAYER_JOINED,
            Packet::PlayerLeft { .. } => kind::PLAYER_LEFT,
            Packet::IntentRejected { .. } => kind::INTENT_REJECTED,
            Packet::Disconnect { .. } => kind::DISCONNECT,
            Packet::KeepAlive => kind::KEEP_ALIVE,
        }
    }

    /// Sequence number of a client intent, `None` for everything else.
    pub fn intent_seq(&self) -> Option<u32> {
        match self {
            Packet::MoveIntent { seq, .. }
            | Packet::BlockIntent { seq, .. }
            | Packet::SelectSlotIntent { seq, .. } => Some(*seq),
            _ => None,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Handshake { .. } => "Handshake",
            Packet::HandshakeAck { .. } => "HandshakeAck",
            Packet::WorldChunk { .. } => "WorldChunk",
            Packet::ChunkStock { .. } => "ChunkStock",
            Packet::BlockDelta { .. } => "BlockDelta",
            Packet::MoveIntent { .. } => "MoveIntent",
            Packet::BlockIntent { .. } => "BlockIntent",
            Packet::SelectSlotIntent { .. } => "SelectSlotIntent",
            Packet::PlayerState { .. } => "PlayerState",
            Packet::PlayerJoined { .. } => "PlayerJoined",
            Packet::PlayerLeft { .. } => "PlayerLeft",
            Packet::IntentRejected { .. } => "IntentRejected",
            Packet::Disconnect { .. } => "Disconnect",
            Packet::KeepAlive => "KeepAlive",
        }
    }
}
