//! Length-prefixed framing for TCP streams.
//!
//! Every message on the wire is a frame:
//!
//! ```text
//! +-------------------+--------------------------+
//! | length (4 bytes)  |   body                   |
//! | u32 big-endian    |   kind byte + payload    |
//! +-------------------+--------------------------+
//! ```
//!
//! The length does **not** include the 4 prefix bytes. A body must hold at
//! least the kind byte, so a zero length is rejected when decoded.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::codec::{DecodeError, EncodeError, decode_body, encode_body};
use crate::packet::{MAX_FRAME_LEN, Packet};

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed body size in bytes. Default: 65 536.
    pub max_frame_len: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

/// Errors that can occur while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The body size exceeds the configured maximum.
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// The actual body size.
        size: u32,
        /// The configured maximum.
        max: u32,
    },

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,

    /// The frame arrived intact but its body is malformed.
    #[error("malformed packet: {0}")]
    Decode(#[from] DecodeError),

    /// The packet could not be encoded.
    #[error("unencodable packet: {0}")]
    Encode(#[from] EncodeError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn closed_or_io(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}

/// Read a single frame body from the stream.
///
/// Blocks until the full frame is available. Returns
/// [`FrameError::ConnectionClosed`] if the peer closes the connection before
/// the frame is complete.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(closed_or_io)?;

    let body_len = u32::from_be_bytes(len_buf);
    if body_len > config.max_frame_len {
        return Err(FrameError::FrameTooLarge {
            size: body_len,
            max: config.max_frame_len,
        });
    }

    let mut body = vec![0u8; body_len as usize];
    if body_len > 0 {
        reader.read_exact(&mut body).await.map_err(closed_or_io)?;
    }

    Ok(body)
}

/// Write a single frame body, prefixed with its big-endian length.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    body: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let len = body.len() as u32;
    if body.len() > config.max_frame_len as usize {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: config.max_frame_len,
        });
    }

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;

    Ok(())
}

/// Read and decode one packet.
pub async fn read_packet<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Packet, FrameError> {
    let body = read_frame(reader, config).await?;
    let packet = decode_body(&body)?;
    tracing::trace!("Received {} ({} bytes)", packet.name(), body.len());
    Ok(packet)
}

/// Encode and write one packet.
pub async fn write_packet<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    packet: &Packet,
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let body = encode_body(packet)?;
    write_frame(writer, &body, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Orientation, RejectReason};
    use tokio::io::duplex;

    fn default_config() -> FrameConfig {
        FrameConfig::default()
    }

    #[tokio::test]
    async fn test_packets_in_sequence() {
        let (mut client, mut server) = duplex(8192);
        let config = default_config();

        let packets = vec![
            Packet::MoveIntent {
                seq: 1,
                position: [0.5, 65.0, 0.5],
                orientation: Orientation::new(10.0, 0.0),
            },
            Packet::KeepAlive,
            Packet::IntentRejected {
                seq: 1,
                reason: RejectReason::TooFast,
            },
        ];
        for packet in &packets {
            write_packet(&mut client, packet, &config).await.unwrap();
        }
        for expected in &packets {
            let received = read_packet(&mut server, &config).await.unwrap();
            assert_eq!(&received, expected);
        }
    }

    #[tokio::test]
    async fn test_partial_read_resumes_correctly() {
        // A tiny duplex buffer forces partial writes and reads.
        let (mut client, mut server) = duplex(8);
        let config = default_config();
        let packet = Packet::Disconnect {
            reason: "this reason is longer than the buffer".into(),
        };

        let write_config = config.clone();
        let sent = packet.clone();
        let write_task = tokio::spawn(async move {
            write_packet(&mut client, &sent, &write_config).await.unwrap();
        });

        let received = read_packet(&mut server, &config).await.unwrap();
        write_task.await.unwrap();
        assert_eq!(received, packet);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_read() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig { max_frame_len: 16 };

        client.write_all(&1024u32.to_be_bytes()).await.unwrap();
        client.flush().await.unwrap();

        let result = read_frame(&mut server, &config).await;
        assert!(matches!(
            result,
            Err(FrameError::FrameTooLarge { size: 1024, max: 16 })
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_write() {
        let (mut client, _server) = duplex(8192);
        let config = FrameConfig { max_frame_len: 16 };

        let result = write_frame(&mut client, &[0u8; 1024], &config).await;
        assert!(matches!(result, Err(FrameError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_empty_body_is_a_decode_error() {
        let (mut client, mut server) = duplex(8192);
        let config = default_config();

        write_frame(&mut client, &[], &config).await.unwrap();
        let result = read_packet(&mut server, &config).await;
        assert!(matches!(result, Err(FrameError::Decode(DecodeError::Empty))));
    }

    #[tokio::test]
    async fn test_connection_closed_during_length_read() {
        let (client, mut server) = duplex(8192);
        drop(client);

        let result = read_frame(&mut server, &default_config()).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_connection_closed_mid_body() {
        let (mut client, mut server) = duplex(8192);
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(&[14, 0, 0]).await.unwrap();
        drop(client);

        let result = read_frame(&mut server, &default_config()).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_length_prefix_is_big_endian() {
        let (mut client, mut server) = duplex(8192);
        client.write_all(&[0, 0, 0, 1, 14]).await.unwrap();
        client.flush().await.unwrap();

        let received = read_packet(&mut server, &default_config()).await.unwrap();
        assert_eq!(received, Packet::KeepAlive);
    }
}
