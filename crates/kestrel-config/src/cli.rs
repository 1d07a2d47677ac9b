//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Kestrel command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "kestrel", about = "Kestrel world replication server and client")]
pub struct CliArgs {
    /// Server address.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Player name.
    #[arg(long)]
    pub name: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Simulation ticks per second.
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// Join the server as a headless client instead of hosting.
    #[arg(long)]
    pub connect: bool,
}

impl CliArgs {
    /// Config directory to load from.
    pub fn config_dir(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_dir)
    }
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(ref name) = args.name {
            self.player.name = name.clone();
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if let Some(rate) = args.tick_rate {
            self.simulation.ticks_per_second = rate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            server: Some("192.168.1.1".to_string()),
            name: Some("Ann".to_string()),
            tick_rate: Some(30),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.server_address, "192.168.1.1");
        assert_eq!(config.player.name, "Ann");
        assert_eq!(config.simulation.ticks_per_second, 30);
        // Non-overridden fields retain defaults
        assert_eq!(config.network.server_port, crate::DEFAULT_PORT);
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from([
            "kestrel",
            "--port",
            "4000",
            "--log-level",
            "debug",
            "--config",
            "/tmp/kestrel",
        ]);
        assert_eq!(args.port, Some(4000));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.config_dir(), PathBuf::from("/tmp/kestrel"));
        assert!(!args.connect);
    }

    #[test]
    fn test_parse_client_mode() {
        let args = CliArgs::parse_from(["kestrel", "--connect", "--name", "Bo"]);
        assert!(args.connect);
        assert_eq!(args.name.as_deref(), Some("Bo"));
    }
}
