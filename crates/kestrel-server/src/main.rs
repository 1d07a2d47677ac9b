//! Kestrel server binary. `--connect` runs a headless client instead.

mod setup;
mod tick_loop;

use clap::Parser;
use kestrel_config::{CliArgs, Config};
use kestrel_multiplayer::{Client, ConnectionStatus};
use kestrel_net::PlayerColors;
use tracing::{error, info, warn};

use crate::tick_loop::TickClock;

fn main() {
    let args = CliArgs::parse();
    let config_dir = args.config_dir();
    let mut config = match Config::load_or_create(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_dir.display());
            std::process::exit(1);
        }
    };
    config.apply_cli_overrides(&args);

    kestrel_log::init_logging(
        Some(&config_dir.join("logs")),
        cfg!(debug_assertions),
        Some(&config),
    );

    if args.connect {
        run_client(&config);
    } else {
        run_server(&config);
    }
}

fn run_server(config: &Config) {
    let mut server = match setup::build_server(config) {
        Ok(server) => server,
        Err(e) => {
            error!("Server failed to start: {e}");
            std::process::exit(1);
        }
    };
    run(config, || server.tick());
}

fn run_client(config: &Config) {
    let mut client = match setup::build_client(config) {
        Ok(client) => client,
        Err(e) => {
            error!("Could not join server: {e}");
            std::process::exit(1);
        }
    };
    let name = config.player.name.clone();
    let colors = setup::player_colors(config);
    let mut requested = false;
    run(config, || {
        client.tick();
        request_spawn_when_ready(&mut client, &mut requested, &name, colors);
    });
}

/// Asks for player 0 once the connection is up and the world list is in, and
/// again whenever the avatar is lost.
fn request_spawn_when_ready(
    client: &mut Client,
    requested: &mut bool,
    name: &str,
    colors: PlayerColors,
) {
    let state = client.state();
    if state.status() != ConnectionStatus::Online {
        *requested = false;
        return;
    }
    if state.avatar(0).is_some() {
        *requested = false;
        return;
    }
    if *requested || state.worlds.is_empty() {
        return;
    }
    match client.request_spawn(0, name, colors) {
        Ok(()) => {
            *requested = true;
            info!(name, "Spawn requested");
        }
        Err(e) => warn!("Spawn request refused: {e}"),
    }
}

fn run(config: &Config, mut tick: impl FnMut()) {
    let mut clock = TickClock::new(config.simulation.ticks_per_second);
    info!(
        tick_rate = config.simulation.ticks_per_second,
        step_ms = clock.step().as_millis() as u64,
        "Entering tick loop"
    );
    loop {
        clock.advance(&mut tick);
        std::thread::sleep(clock.until_next());
    }
}
