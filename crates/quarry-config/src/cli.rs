//! Command-line argument parsing for the server and client binaries.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Port clients connect to.
pub const DEFAULT_PORT: u16 = 9999;

/// Quarry server command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "quarry-server", about = "Quarry voxel sandbox server")]
pub struct ServerArgs {
    /// Address to bind.
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    pub port: Option<u16>,

    /// World seed.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Quarry headless client command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "quarry-client", about = "Quarry headless client")]
pub struct ClientArgs {
    /// Player name.
    #[arg(default_value = "Player")]
    pub name: String,

    /// Server host. The port is always 9999.
    #[arg(default_value = "localhost")]
    pub host: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl ClientArgs {
    /// `host:port` of the server to connect to.
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, DEFAULT_PORT)
    }
}

impl Config {
    /// Apply server CLI overrides to a loaded config.
    pub fn apply_server_args(&mut self, args: &ServerArgs) {
        if let Some(ref host) = args.host {
            self.network.bind_host = host.clone();
        }
        if let Some(port) = args.port {
            self.network.port = port;
        }
        if let Some(seed) = args.seed {
            self.world.seed = seed;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }

    /// Apply client CLI overrides to a loaded config.
    pub fn apply_client_args(&mut self, args: &ClientArgs) {
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_override() {
        let mut config = Config::default();
        let args = ServerArgs {
            host: Some("127.0.0.1".to_string()),
            seed: Some(7),
            ..ServerArgs::default()
        };
        config.apply_server_args(&args);
        assert_eq!(config.network.bind_host, "127.0.0.1");
        assert_eq!(config.world.seed, 7);
        // Non-overridden fields retain defaults
        assert_eq!(config.network.port, 9999);
    }

    #[test]
    fn test_server_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_server_args(&ServerArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_server_args_parse() {
        let args = ServerArgs::parse_from(["quarry-server", "--port", "4000", "--seed", "99"]);
        assert_eq!(args.port, Some(4000));
        assert_eq!(args.seed, Some(99));
        assert!(args.host.is_none());
    }

    #[test]
    fn test_client_defaults() {
        let args = ClientArgs::parse_from(["quarry-client"]);
        assert_eq!(args.name, "Player");
        assert_eq!(args.host, "localhost");
        assert_eq!(args.server_address(), "localhost:9999");
    }

    #[test]
    fn test_client_positionals() {
        let args = ClientArgs::parse_from(["quarry-client", "Alex", "10.0.0.2"]);
        assert_eq!(args.name, "Alex");
        assert_eq!(args.server_address(), "10.0.0.2:9999");

        let mut config = Config::default();
        config.apply_client_args(&args);
        assert_eq!(config.debug.log_level, "info");
    }
}
