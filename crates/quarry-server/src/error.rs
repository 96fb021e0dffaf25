//! Server error taxonomy.

use quarry_config::ConfigError;
use quarry_protocol::{FrameError, PlayerId};

use crate::rules::ValidationError;

/// Errors surfaced by the server.
///
/// Only [`ServerError::Fatal`], [`ServerError::Io`] and
/// [`ServerError::Config`] end the process; the others are local to one
/// connection or one intent.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Malformed, truncated or unexpected packet. Closes the connection.
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    /// Intent refused by the rules.
    #[error("intent rejected: {0}")]
    Validation(#[from] ValidationError),

    /// A client could not keep up with its send queue.
    #[error("send queue overflow for player {player_id}")]
    ResourceExhaustion { player_id: PlayerId },

    /// Bind failure or broken internal invariant.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ServerError {
    /// Whether the error must stop the whole server.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_) | Self::Io(_) | Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(ServerError::Fatal("bind".into()).is_fatal());
        assert!(!ServerError::ResourceExhaustion { player_id: 3 }.is_fatal());
        assert!(!ServerError::from(ValidationError::StateChanged).is_fatal());
        assert!(!ServerError::from(FrameError::ConnectionClosed).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = ServerError::ResourceExhaustion { player_id: 7 };
        assert_eq!(err.to_string(), "send queue overflow for player 7");
    }
}
