//! Wire protocol: packet model, fixed binary layout, and length-prefixed framing.

pub mod codec;
pub mod framing;
pub mod packet;

pub use codec::{DecodeError, EncodeError, decode_body, decode_frame, encode, encode_body};
pub use framing::{FrameConfig, FrameError, read_frame, read_packet, write_frame, write_packet};
pub use packet::{
    BlockAction, ChunkBlocks, MAX_FRAME_LEN, MAX_SKIN_LEN, MAX_STRING_LEN, Orientation, PROTOCOL_VERSION,
    Packet, PlayerId, RejectReason, kind,
};
