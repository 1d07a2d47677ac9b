//! Configuration for Kestrel servers and clients.
//!
//! Settings persist to disk as `config.ron` and are overridden from the
//! command line via clap. Missing fields fall back to defaults, so older
//! config files keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    CONFIG_FILE, ChatSettings, Config, DEFAULT_PORT, DebugConfig, NetworkConfig, PlayerConfig,
    SimulationConfig, WorldConfig,
};
pub use error::ConfigError;
