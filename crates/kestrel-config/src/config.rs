//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default server port.
pub const DEFAULT_PORT: u16 = 12916;

/// Top-level configuration shared by the server and clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Connection and transport settings.
    pub network: NetworkConfig,
    /// Tick and replication rates.
    pub simulation: SimulationConfig,
    /// Chat limits and history.
    pub chat: ChatSettings,
    /// Local player identity.
    pub player: PlayerConfig,
    /// Worlds the server opens.
    pub world: WorldConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server address to bind (server) or join (client).
    pub server_address: String,
    pub server_port: u16,
    /// Silence after which a remote is dropped.
    pub timeout_seconds: u32,
    /// Keep-alive interval when the link is otherwise idle.
    pub heartbeat_interval_ms: u64,
    /// Delay before an unacknowledged reliable datagram is resent.
    pub resend_interval_ms: u64,
    pub max_resends: u32,
    /// Local players one connection may spawn.
    pub max_players_per_client: u32,
    /// Shared passphrase for packet signing. `None` uses the built-in key.
    pub signing_key: Option<String>,
}

/// Simulation and replication rates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    pub ticks_per_second: u32,
    /// Server entity broadcasts per second.
    pub broadcast_rate_hz: u32,
    /// Client player reports per second.
    pub report_rate_hz: u32,
    /// Fraction of the remaining distance network-driven entities move per tick.
    pub interpolation: f32,
}

/// Chat configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatSettings {
    pub max_message_length: usize,
    /// Messages allowed per connection within the window.
    pub rate_limit_messages: u32,
    pub rate_limit_window_secs: u64,
    /// Lines a client keeps.
    pub history: usize,
}

/// Local player configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    pub name: String,
    /// Head, torso, arms and feet; three RGB triples each.
    pub colors: [[[u8; 3]; 3]; 4],
    /// Fixed seed for spawn placement (server only).
    pub spawn_seed: Option<u64>,
}

/// Worlds the server opens at startup: generated zones first, then map files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    pub maps_dir: PathBuf,
    pub zones: Vec<String>,
    pub maps: Vec<String>,
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
            server_address: "127.0.0.1".to_string(),
            server_port: DEFAULT_PORT,
            timeout_seconds: 10,
            heartbeat_interval_ms: 1000,
            resend_interval_ms: 200,
            max_resends: 10,
            max_players_per_client: 4,
            signing_key: None,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: 60,
            broadcast_rate_hz: 10,
            report_rate_hz: 10,
            interpolation: 0.25,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_message_length: 256,
            rate_limit_messages: 5,
            rate_limit_window_secs: 10,
            history: 100,
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            name: "Player".to_string(),
            colors: [[[128; 3]; 3]; 4],
            spawn_seed: None,
        }
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            maps_dir: PathBuf::from("maps"),
            zones: vec!["plaza".to_string()],
            maps: Vec::new(),
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

// --- Load / Save / Reload ---

/// File name inside the config directory.
pub const CONFIG_FILE: &str = "config.ron";

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
    ron::from_str(&contents).map_err(ConfigError::ParseError)
}

impl Config {
    /// Reads `config.ron` from `config_dir`, writing the defaults there first
    /// when the file does not exist yet.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE);
        if !path.exists() {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", path.display());
            return Ok(config);
        }
        let config = read_file(&path)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Writes `config.ron` into `config_dir`, creating the directory.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let text = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;
        std::fs::write(config_dir.join(CONFIG_FILE), text).map_err(ConfigError::WriteError)
    }

    /// Re-reads the file. `Some` carries the new settings when they differ
    /// from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let fresh = read_file(&config_dir.join(CONFIG_FILE))?;
        if fresh == *self {
            return Ok(None);
        }
        log::info!("Config reloaded with changes");
        Ok(Some(fresh))
    }

    /// Rejects settings the tick loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| -> Result<(), ConfigError> {
            Err(ConfigError::InvalidValue {
                field,
                reason: reason.to_string(),
            })
        };
        let sim = &self.simulation;
        if sim.ticks_per_second == 0 {
            return invalid("simulation.ticks_per_second", "must be positive");
        }
        if sim.broadcast_rate_hz == 0 || sim.broadcast_rate_hz > sim.ticks_per_second {
            return invalid("simulation.broadcast_rate_hz", "must be between 1 and the tick rate");
        }
        if sim.report_rate_hz == 0 || sim.report_rate_hz > sim.ticks_per_second {
            return invalid("simulation.report_rate_hz", "must be between 1 and the tick rate");
        }
        if !(0.0..=1.0).contains(&sim.interpolation) {
            return invalid("simulation.interpolation", "must be within 0.0..=1.0");
        }
        if self.network.max_players_per_client == 0 {
            return invalid("network.max_players_per_client", "must be positive");
        }
        if self.player.name.trim().is_empty() {
            return invalid("player.name", "must not be empty");
        }
        Ok(())
    }

    /// Default config directory: `<platform config dir>/kestrel`, or the
    /// working directory when the platform has none.
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("kestrel"))
            .unwrap_or_else(|| PathBuf::from("."))
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
        assert!(ron_str.contains("server_port: 12916"));
        assert!(ron_str.contains("ticks_per_second: 60"));
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.network.signing_key = Some("hunter2".into());
        config.player.spawn_seed = Some(42);
        config.world.maps.push("harbour".into());
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(network: (server_port: 4000))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.network.server_port, 4000);
        assert_eq!(config.network.max_resends, 10);
        assert_eq!(config.chat, ChatSettings::default());
        assert_eq!(config.world.zones, vec!["plaza".to_string()]);
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
        config.player.name = "Ann".to_string();
        config.network.server_address = "10.0.0.1".to_string();
        config.simulation.broadcast_rate_hz = 20;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_default() {
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
        modified.simulation.ticks_per_second = 30;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.map(|c| c.simulation.ticks_per_second), Some(30));
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.ron"), "{{not valid}}").unwrap();
        assert!(matches!(
            Config::load_or_create(dir.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_rates() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.simulation.broadcast_rate_hz = 120;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "simulation.broadcast_rate_hz", .. })
        ));

        let mut config = Config::default();
        config.simulation.interpolation = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.player.name = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ron_comments_accepted() {
        let ron_str = "// server settings\n(\n  // nothing overridden\n)";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config, Config::default());
    }
}
