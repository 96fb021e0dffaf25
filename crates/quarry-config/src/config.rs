//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Name of the config file inside the config directory.
pub const CONFIG_FILE: &str = "config.ron";

/// Platform config directory for Quarry (`<config_dir>/quarry`), falling back
/// to the working directory when the platform has none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("quarry"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener and connection settings.
    pub network: NetworkConfig,
    /// World generation and bounds.
    pub world: WorldConfig,
    /// Tick rate and intent validation.
    pub rules: RulesConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the server binds to.
    pub bind_host: String,
    /// TCP port.
    pub port: u16,
    /// Handshakes beyond this many players are refused.
    pub max_players: u32,
    /// Close a session after this long without any inbound packet.
    pub idle_timeout_secs: u64,
    /// Close a connection that has not completed its handshake in this time.
    pub handshake_timeout_secs: u64,
    /// Interval between server keep-alives.
    pub keepalive_interval_secs: u64,
    /// Outbound packets buffered per connection.
    pub send_queue_capacity: usize,
    /// Inbound intents buffered per connection.
    pub intent_queue_capacity: usize,
    /// Consecutive ticks with a full send queue before the session is dropped.
    pub overflow_grace_ticks: u32,
    /// Largest accepted frame body in bytes.
    pub max_frame_len: u32,
}

/// World configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    /// Terrain seed.
    pub seed: u64,
    /// Lowest buildable Y (inclusive).
    pub min_y: i32,
    /// Highest buildable Y (exclusive).
    pub max_y: i32,
    /// `|x|` and `|z|` must stay below this.
    pub horizontal_limit: i32,
}

/// Simulation and validation rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RulesConfig {
    /// Ticks per second.
    pub tick_rate: u32,
    /// Maximum horizontal-plus-vertical speed in blocks per second.
    pub max_speed: f32,
    /// Extra distance allowed on every move, in blocks.
    pub move_tolerance: f32,
    /// Maximum eye-to-block distance for block intents.
    pub reach_distance: f32,
    /// Chunk radius streamed around each player.
    pub view_radius: u8,
    /// Maximum new chunks sent to one client per tick.
    pub chunks_per_tick: usize,
    /// Number of hotbar slots.
    pub hotbar_slots: u8,
    /// Refuse placements that overlap a player's bounding box.
    pub enforce_player_collision: bool,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 9999,
            max_players: 32,
            idle_timeout_secs: 15,
            handshake_timeout_secs: 5,
            keepalive_interval_secs: 5,
            send_queue_capacity: 1024,
            intent_queue_capacity: 256,
            overflow_grace_ticks: 40,
            max_frame_len: 65_536,
        }
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            min_y: 0,
            max_y: 256,
            horizontal_limit: 65_536,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            max_speed: 10.0,
            move_tolerance: 0.5,
            reach_distance: 6.0,
            view_radius: 4,
            chunks_per_tick: 8,
            hotbar_slots: 9,
            enforce_player_collision: true,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    /// `host:port` string for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

impl RulesConfig {
    /// Length of one tick.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join(CONFIG_FILE);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Re-read the file: returns `Some(new_config)` if it changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Rejects values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        }

        if self.rules.tick_rate == 0 {
            return invalid("rules.tick_rate", "must be at least 1");
        }
        if !(self.rules.max_speed.is_finite() && self.rules.max_speed > 0.0) {
            return invalid("rules.max_speed", "must be a positive number");
        }
        if self.rules.hotbar_slots == 0 {
            return invalid("rules.hotbar_slots", "must be at least 1");
        }
        if self.world.min_y >= self.world.max_y {
            return invalid("world.min_y", "must be below world.max_y");
        }
        if self.world.horizontal_limit <= 0 {
            return invalid("world.horizontal_limit", "must be positive");
        }
        if self.network.send_queue_capacity == 0 || self.network.intent_queue_capacity == 0 {
            return invalid("network.*_queue_capacity", "must be at least 1");
        }
        if self.network.max_frame_len < 5 {
            return invalid("network.max_frame_len", "too small for any packet");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("port: 9999"));
        assert!(ron_str.contains("tick_rate: 20"));
        assert!(ron_str.contains("enforce_player_collision: true"));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(network: (port: 4000), debug: ())";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.network.port, 4000);
        assert_eq!(config.network.max_players, 32);
        assert_eq!(config.rules, RulesConfig::default());
        assert_eq!(config.world, WorldConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.world.seed = 12345;
        config.rules.view_radius = 6;
        config.network.bind_host = "127.0.0.1".to_string();

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.rules.max_speed = 20.0;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.map(|c| c.rules.max_speed), Some(20.0));
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        assert!(config.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_values_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "(rules: (tick_rate: 0))").unwrap();
        let result = Config::load_or_create(dir.path());
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "rules.tick_rate",
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{{not valid}}").unwrap();
        assert!(matches!(
            Config::load_or_create(dir.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.rules.tick_duration(), Duration::from_millis(50));
        assert_eq!(config.network.idle_timeout(), Duration::from_secs(15));
        assert_eq!(config.network.bind_address(), "0.0.0.0:9999");
    }
}
