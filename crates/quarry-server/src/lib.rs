//! Authoritative Quarry server.
//!
//! Connection tasks decode client packets into intents; a single tick loop
//! owns the world and the player registry, validates and applies intents, and
//! fans each tick's changes out to the clients that can see them.

pub mod connection;
pub mod error;
pub mod fanout;
pub mod intent;
pub mod platform;
pub mod registry;
pub mod rules;
pub mod server;
pub mod session;
pub mod tick;

pub use error::ServerError;
pub use intent::{IntentKind, QueuedIntent, merge_by_arrival};
pub use platform::{SocketConfig, configure_stream, create_listener};
pub use registry::{Player, PlayerRegistry, RegistryError};
pub use rules::{RuleSet, ValidationError};
pub use server::GameServer;
pub use session::{CloseReason, ConnectionId, Lifecycle, SessionError, SessionState};
pub use tick::{TickBroadcaster, TickReport, TickSettings, spawn_point};
