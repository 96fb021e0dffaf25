//! Headless Quarry client.
//!
//! [`GameClient`] owns the TCP session; [`LocalWorld`] folds the packets it
//! receives into a mirror of the server's chunks and players.

pub mod client;
pub mod error;
pub mod world;

pub use client::{ConnectionState, ConnectionStateWatch, GameClient, SessionInfo};
pub use error::ClientError;
pub use world::{LocalWorld, RemotePlayer, WorldEvent};
