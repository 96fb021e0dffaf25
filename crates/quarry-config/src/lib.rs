//! Configuration for the Quarry server and client.
//!
//! Settings persist to disk as a RON file and can be overridden from the
//! command line. Missing sections and fields fall back to their defaults, so
//! older config files keep loading as new settings are added.

mod cli;
mod config;
mod error;

pub use cli::{ClientArgs, DEFAULT_PORT, ServerArgs};
pub use config::{
    CONFIG_FILE, Config, DebugConfig, NetworkConfig, RulesConfig, WorldConfig, default_config_dir,
};
pub use error::ConfigError;
