//! Fixed binary layout for every [`Packet`].
//!
//! ```text
//! +-------------------+-----------+--------------------+
//! | length (4 bytes)  | kind (1)  |   payload          |
//! | u32 big-endian    |           |   (length-1 bytes) |
//! +-------------------+-----------+--------------------+
//! ```
//!
//! `length` counts the kind byte and the payload. All integers and `f32`
//! values are big-endian. Strings are a `u16` byte length followed by UTF-8;
//! optional byte blobs are a `u8` presence flag followed, when set, by a `u16`
//! length and the bytes.
//!
//! Decoding never panics: every read is bounds-checked first, and any leftover
//! bytes after the last field are an error.

use bytes::{Buf, BufMut};
use quarry_world::{Block, BlockPos, CHUNK_VOLUME, ChunkCoord, UnknownBlock};
use thiserror::Error;

use crate::packet::{
    BlockAction, ChunkBlocks, MAX_FRAME_LEN, MAX_SKIN_LEN, MAX_STRING_LEN, Orientation, Packet,
    RejectReason, kind,
};

/// Errors produced while decoding a frame or frame body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty frame body")]
    Empty,
    #[error("unknown packet kind {0}")]
    UnknownKind(u8),
    #[error("truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),
    #[error("declared length {declared} does not match actual {actual}")]
    LengthMismatch { declared: u32, actual: usize },
    #[error("frame length {len} exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: u32 },
    #[error(transparent)]
    InvalidBlock(#[from] UnknownBlock),
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("field length {len} exceeds maximum {max}")]
    TooLong { len: usize, max: usize },
    #[error("invalid presence flag {0}")]
    InvalidFlag(u8),
    #[error("invalid block action {0}")]
    InvalidAction(u8),
    #[error("invalid reject reason {0}")]
    InvalidReason(u8),
}

/// Errors produced while encoding a packet that violates a field limit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("field length {len} exceeds maximum {max}")]
    TooLong { len: usize, max: usize },
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encodes a complete frame: length prefix, kind and payload.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, EncodeError> {
    let body = encode_body(packet)?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.put_u32(body.len() as u32);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Encodes the frame body (kind byte and payload) without the length prefix.
pub fn encode_body(packet: &Packet) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(32);
    out.put_u8(packet.kind());
    match packet {
        Packet::Handshake {
            version,
            name,
            skin,
        } => {
            out.put_u8(*version);
            put_string(&mut out, name)?;
            match skin {
                Some(bytes) => {
                    check_len(bytes.len(), MAX_SKIN_LEN)?;
                    out.put_u8(1);
                    out.put_u16(bytes.len() as u16);
                    out.put_slice(bytes);
                }
                None => out.put_u8(0),
            }
        }
        Packet::HandshakeAck {
            version,
            player_id,
            name,
            seed,
            spawn,
            tick,
            view_radius,
        } => {
            out.put_u8(*version);
            out.put_u32(*player_id);
            put_string(&mut out, name)?;
            out.put_u64(*seed);
            put_position(&mut out, spawn);
            out.put_u64(*tick);
            out.put_u8(*view_radius);
        }
        Packet::WorldChunk { coord, blocks } => {
            put_chunk_coord(&mut out, *coord);
            out.extend(blocks.blocks().iter().map(|b| b.code()));
        }
        Packet::ChunkStock { coord } => put_chunk_coord(&mut out, *coord),
        Packet::BlockDelta { pos, block, tick } => {
            put_block_pos(&mut out, *pos);
            out.put_u8(block.code());
            out.put_u64(*tick);
        }
        Packet::MoveIntent {
            seq,
            position,
            orientation,
        } => {
            out.put_u32(*seq);
            put_position(&mut out, position);
            put_orientation(&mut out, *orientation);
        }
        Packet::BlockIntent {
            seq,
            pos,
            action,
            block,
        } => {
            out.put_u32(*seq);
            put_block_pos(&mut out, *pos);
            out.put_u8(*action as u8);
            out.put_u8(block.code());
        }
        Packet::SelectSlotIntent { seq, slot } => {
            out.put_u32(*seq);
            out.put_u8(*slot);
        }
        Packet::PlayerState {
            player_id,
            position,
            orientation,
            selected_slot,
            tick,
        } => {
            out.put_u32(*player_id);
            put_position(&mut out, position);
            put_orientation(&mut out, *orientation);
            out.put_u8(*selected_slot);
            out.put_u64(*tick);
        }
        Packet::PlayerJoined { player_id, name } => {
            out.put_u32(*player_id);
            put_string(&mut out, name)?;
        }
        Packet::PlayerLeft { player_id } => out.put_u32(*player_id),
        Packet::IntentRejected { seq, reason } => {
            out.put_u32(*seq);
            out.put_u8(reason.code());
        }
        Packet::Disconnect { reason } => put_string(&mut out, reason)?,
        Packet::KeepAlive => {}
    }
    Ok(out)
}

fn check_len(len: usize, max: usize) -> Result<(), EncodeError> {
    if len > max {
        return Err(EncodeError::TooLong { len, max });
    }
    Ok(())
}

fn put_string(out: &mut Vec<u8>, s: &str) -> Result<(), EncodeError> {
    check_len(s.len(), MAX_STRING_LEN)?;
    out.put_u16(s.len() as u16);
    out.put_slice(s.as_bytes());
    Ok(())
}

fn put_position(out: &mut Vec<u8>, position: &[f32; 3]) {
    for v in position {
        out.put_f32(*v);
    }
}

fn put_orientation(out: &mut Vec<u8>, orientation: Orientation) {
    out.put_f32(orientation.yaw);
    out.put_f32(orientation.pitch);
}

fn put_chunk_coord(out: &mut Vec<u8>, coord: ChunkCoord) {
    out.put_i32(coord.x);
    out.put_i32(coord.y);
    out.put_i32(coord.z);
}

fn put_block_pos(out: &mut Vec<u8>, pos: BlockPos) {
    out.put_i32(pos.x);
    out.put_i32(pos.y);
    out.put_i32(pos.z);
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decodes a complete frame, checking the length prefix against the buffer.
pub fn decode_frame(frame: &[u8]) -> Result<Packet, DecodeError> {
    let mut r = Reader(frame);
    let declared = r.u32()?;
    if declared > MAX_FRAME_LEN {
        return Err(DecodeError::FrameTooLarge {
            len: declared as usize,
            max: MAX_FRAME_LEN,
        });
    }
    let actual = r.0.len();
    if declared as usize != actual {
        return Err(DecodeError::LengthMismatch { declared, actual });
    }
    decode_body(r.0)
}

/// Decodes a frame body (kind byte and payload).
pub fn decode_body(body: &[u8]) -> Result<Packet, DecodeError> {
    if body.len() > MAX_FRAME_LEN as usize {
        return Err(DecodeError::FrameTooLarge {
            len: body.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let mut r = Reader(body);
    if r.0.is_empty() {
        return Err(DecodeError::Empty);
    }
    let kind = r.u8()?;
    let packet = match kind {
        kind::HANDSHAKE => Packet::Handshake {
            version: r.u8()?,
            name: r.string()?,
            skin: r.optional_bytes()?,
        },
        kind::HANDSHAKE_ACK => Packet::HandshakeAck {
            version: r.u8()?,
            player_id: r.u32()?,
            name: r.string()?,
            seed: r.u64()?,
            spawn: r.position()?,
            tick: r.u64()?,
            view_radius: r.u8()?,
        },
        kind::WORLD_CHUNK => {
            let coord = r.chunk_coord()?;
            let codes = r.take(CHUNK_VOLUME)?;
            let blocks = ChunkBlocks::from_codes(codes).ok_or(DecodeError::Truncated {
                needed: CHUNK_VOLUME,
                remaining: codes.len(),
            })??;
            Packet::WorldChunk { coord, blocks }
        }
        kind::CHUNK_STOCK => Packet::ChunkStock {
            coord: r.chunk_coord()?,
        },
        kind::BLOCK_DELTA => Packet::BlockDelta {
            pos: r.block_pos()?,
            block: r.block()?,
            tick: r.u64()?,
        },
        kind::MOVE_INTENT => Packet::MoveIntent {
            seq: r.u32()?,
            position: r.position()?,
            orientation: r.orientation()?,
        },
        kind::BLOCK_INTENT => {
            let seq = r.u32()?;
            let pos = r.block_pos()?;
            let action_code = r.u8()?;
            let action =
                BlockAction::from_code(action_code).ok_or(DecodeError::InvalidAction(action_code))?;
            Packet::BlockIntent {
                seq,
                pos,
                action,
                block: r.block()?,
            }
        }
        kind::SELECT_SLOT_INTENT => Packet::SelectSlotIntent {
            seq: r.u32()?,
            slot: r.u8()?,
        },
        kind::PLAYER_STATE => Packet::PlayerState {
            player_id: r.u32()?,
            position: r.position()?,
            orientation: r.orientation()?,
            selected_slot: r.u8()?,
            tick: r.u64()?,
        },
        kind::PLAYER_JOINED => Packet::PlayerJoined {
            player_id: r.u32()?,
            name: r.string()?,
        },
        kind::PLAYER_LEFT => Packet::PlayerLeft {
            player_id: r.u32()?,
        },
        kind::INTENT_REJECTED => {
            let seq = r.u32()?;
            let code = r.u8()?;
            Packet::IntentRejected {
                seq,
                reason: RejectReason::from_code(code).ok_or(DecodeError::InvalidReason(code))?,
            }
        }
        kind::DISCONNECT => Packet::Disconnect {
            reason: r.string()?,
        },
        kind::KEEP_ALIVE => Packet::KeepAlive,
        other => return Err(DecodeError::UnknownKind(other)),
    };
    if !r.0.is_empty() {
        return Err(DecodeError::TrailingBytes(r.0.len()));
    }
    Ok(packet)
}

/// Bounds-checked cursor over a byte slice.
struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    fn need(&self, needed: usize) -> Result<(), DecodeError> {
        if self.0.remaining() < needed {
            return Err(DecodeError::Truncated {
                needed,
                remaining: self.0.remaining(),
            });
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.need(len)?;
        let (head, tail) = self.0.split_at(len);
        self.0 = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        Ok(self.0.get_u8())
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        self.need(2)?;
        Ok(self.0.get_u16())
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        Ok(self.0.get_u32())
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        self.need(4)?;
        Ok(self.0.get_i32())
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        self.need(8)?;
        Ok(self.0.get_u64())
    }

    fn f32(&mut self) -> Result<f32, DecodeError> {
        self.need(4)?;
        Ok(self.0.get_f32())
    }

    fn block(&mut self) -> Result<Block, DecodeError> {
        Ok(Block::try_from(self.u8()?)?)
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.u16()? as usize;
        if len > MAX_STRING_LEN {
            return Err(DecodeError::TooLong {
                len,
                max: MAX_STRING_LEN,
            });
        }
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    fn optional_bytes(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        match self.u8()? {
            0 => Ok(None),
            1 => {
                let len = self.u16()? as usize;
                if len > MAX_SKIN_LEN {
                    return Err(DecodeError::TooLong {
                        len,
                        max: MAX_SKIN_LEN,
                    });
                }
                Ok(Some(self.take(len)?.to_vec()))
            }
            flag => Err(DecodeError::InvalidFlag(flag)),
        }
    }

    fn position(&mut self) -> Result<[f32; 3], DecodeError> {
        Ok([self.f32()?, self.f32()?, self.f32()?])
    }

    fn orientation(&mut self) -> Result<Orientation, DecodeError> {
        Ok(Orientation::new(self.f32()?, self.f32()?))
    }

    fn chunk_coord(&mut self) -> Result<ChunkCoord, DecodeError> {
        Ok(ChunkCoord::new(self.i32()?, self.i32()?, self.i32()?))
    }

    fn block_pos(&mut self) -> Result<BlockPos, DecodeError> {
        Ok(BlockPos::new(self.i32()?, self.i32()?, self.i32()?))
    }
}
