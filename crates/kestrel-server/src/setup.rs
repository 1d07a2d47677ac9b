//! Turns a loaded [`Config`] into a running [`Server`] or [`Client`].

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use kestrel_config::{Config, ConfigError};
use kestrel_multiplayer::{ChatConfig, Client, ClientSettings, Server, ServerSettings};
use kestrel_net::{NetContext, PlayerColors, TransportError, UdpConfig, UdpTransport};
use kestrel_world::{MapLoader, WorldError, WorldLoader, WorldOrigin, WorldRegistry};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `server_address:server_port` did not resolve.
    #[error("cannot resolve bind address {0}")]
    Address(String),

    #[error("cannot open socket: {0}")]
    Transport(#[from] TransportError),

    #[error("cannot open world: {0}")]
    World(#[from] WorldError),

    /// The world list in the config is empty.
    #[error("no worlds configured")]
    NoWorlds,
}

pub fn server_settings(config: &Config) -> ServerSettings {
    ServerSettings {
        ticks_per_second: config.simulation.ticks_per_second,
        broadcast_rate_hz: config.simulation.broadcast_rate_hz,
        max_players_per_client: config.network.max_players_per_client,
        chat: ChatConfig {
            max_message_length: config.chat.max_message_length,
            rate_limit_messages: config.chat.rate_limit_messages,
            rate_limit_window: Duration::from_secs(config.chat.rate_limit_window_secs),
        },
        spawn_seed: config.player.spawn_seed,
    }
}

pub fn client_settings(config: &Config) -> ClientSettings {
    ClientSettings {
        ticks_per_second: config.simulation.ticks_per_second,
        report_rate_hz: config.simulation.report_rate_hz,
        interpolation: config.simulation.interpolation,
        chat_history: config.chat.history,
        max_players_per_client: config.network.max_players_per_client,
    }
}

pub fn player_colors(config: &Config) -> PlayerColors {
    PlayerColors(config.player.colors)
}

pub fn udp_config(config: &Config) -> UdpConfig {
    let network = &config.network;
    UdpConfig {
        resend_interval: Duration::from_millis(network.resend_interval_ms),
        max_resends: network.max_resends,
        heartbeat_interval: Duration::from_millis(network.heartbeat_interval_ms),
        timeout: Duration::from_secs(u64::from(network.timeout_seconds)),
        ..UdpConfig::default()
    }
}

pub fn net_context(config: &Config) -> NetContext {
    match &config.network.signing_key {
        Some(key) if !key.is_empty() => NetContext::with_passphrase(key),
        _ => NetContext::default(),
    }
}

pub fn bind_address(config: &Config) -> Result<SocketAddr, SetupError> {
    let target = format!(
        "{}:{}",
        config.network.server_address, config.network.server_port
    );
    target
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or(SetupError::Address(target))
}

/// Opens the configured zones, then the configured map files. World ids
/// follow that order.
pub fn open_worlds(config: &Config, loader: &dyn WorldLoader) -> Result<WorldRegistry, SetupError> {
    let zones = config
        .world
        .zones
        .iter()
        .map(|zone| WorldOrigin::Generated { zone: zone.clone() });
    let maps = config
        .world
        .maps
        .iter()
        .map(|path| WorldOrigin::File { path: path.clone() });

    let mut worlds = WorldRegistry::new();
    for origin in zones.chain(maps) {
        worlds.open(loader, origin)?;
    }
    if worlds.is_empty() {
        return Err(SetupError::NoWorlds);
    }
    Ok(worlds)
}

/// Validates `config`, opens its worlds and binds the UDP socket.
pub fn build_server(config: &Config) -> Result<Server, SetupError> {
    config.validate()?;
    let loader = MapLoader::new(&config.world.maps_dir);
    let worlds = open_worlds(config, &loader)?;
    let addr = bind_address(config)?;
    let transport = UdpTransport::host(addr, udp_config(config))?;
    info!(%addr, worlds = worlds.len(), "Server ready");
    Ok(Server::new(
        Box::new(transport),
        net_context(config),
        worlds,
        server_settings(config),
    ))
}

/// Validates `config` and starts joining the configured server. Worlds are
/// loaded from `maps_dir` once the server lists them.
pub fn build_client(config: &Config) -> Result<Client, SetupError> {
    config.validate()?;
    let addr = bind_address(config)?;
    let transport = UdpTransport::connect(addr, udp_config(config))?;
    info!(%addr, name = %config.player.name, "Joining server");
    Ok(Client::new(
        Box::new(transport),
        net_context(config),
        Arc::new(MapLoader::new(&config.world.maps_dir)),
        client_settings(config),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_follow_config() {
        let mut config = Config::default();
        config.simulation.broadcast_rate_hz = 20;
        config.chat.rate_limit_window_secs = 3;
        config.player.spawn_seed = Some(9);

        let settings = server_settings(&config);
        assert_eq!(settings.broadcast_interval(), 3);
        assert_eq!(settings.chat.rate_limit_window, Duration::from_secs(3));
        assert_eq!(settings.spawn_seed, Some(9));

        let udp = udp_config(&config);
        assert_eq!(udp.timeout, Duration::from_secs(10));
        assert_eq!(udp.resend_interval, Duration::from_millis(200));
    }

    #[test]
    fn test_client_settings_follow_config() {
        let mut config = Config::default();
        config.simulation.report_rate_hz = 30;
        config.simulation.interpolation = 0.5;
        config.chat.history = 12;
        config.player.colors[1][0] = [255, 0, 0];

        let settings = client_settings(&config);
        assert_eq!(settings.report_interval(), 2);
        assert_eq!(settings.interpolation, 0.5);
        assert_eq!(settings.chat_history, 12);
        assert_eq!(settings.max_players_per_client, 4);
        assert_eq!(player_colors(&config).0[1][0], [255, 0, 0]);
    }

    #[test]
    fn test_bind_address() {
        let mut config = Config::default();
        config.network.server_port = 4000;
        assert_eq!(
            bind_address(&config).unwrap(),
            "127.0.0.1:4000".parse::<SocketAddr>().unwrap()
        );

        config.network.server_address = "not an address".into();
        assert!(matches!(bind_address(&config), Err(SetupError::Address(_))));
    }

    #[test]
    fn test_open_worlds_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("harbour.ron"),
            "(entities: [(def: \"player_start\", position: (1.0, 0.0, 0.0), angle: (0.0, 0.0, 0.0))])",
        )
        .unwrap();
        let mut config = Config::default();
        config.world.zones = vec!["plaza".into(), "docks".into()];
        config.world.maps = vec!["harbour".into()];

        let worlds = open_worlds(&config, &MapLoader::new(dir.path())).unwrap();
        let names: Vec<_> = worlds.iter().map(|w| w.short_name().to_string()).collect();
        assert_eq!(names, vec!["plaza", "docks", "harbour"]);
    }

    #[test]
    fn test_missing_map_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.world.maps = vec!["nowhere".into()];
        assert!(matches!(
            open_worlds(&config, &MapLoader::new(dir.path())),
            Err(SetupError::World(_))
        ));
    }

    #[test]
    fn test_empty_world_list() {
        let mut config = Config::default();
        config.world.zones.clear();
        assert!(matches!(
            open_worlds(&config, &MapLoader::default()),
            Err(SetupError::NoWorlds)
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.simulation.ticks_per_second = 0;
        assert!(matches!(
            build_server(&config),
            Err(SetupError::Config(ConfigError::InvalidValue { .. }))
        ));

        let mut config = Config::default();
        config.player.name.clear();
        assert!(matches!(
            build_client(&config),
            Err(SetupError::Config(ConfigError::InvalidValue { field: "player.name", .. }))
        ));
    }
}
