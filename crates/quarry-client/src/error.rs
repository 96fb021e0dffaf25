use quarry_protocol::FrameError;

/// Errors returned by [`crate::GameClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    /// The server answered the handshake with `Disconnect`.
    #[error("refused by server: {0}")]
    Refused(String),

    #[error("expected HandshakeAck, got {0}")]
    UnexpectedPacket(&'static str),

    #[error("no HandshakeAck within {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("not connected")]
    NotConnected,
}
