//! Structured logging for Kestrel binaries.
//!
//! Console output carries uptime timestamps and targets. Debug builds also
//! write JSON lines to `kestrel.log` for post-mortem analysis. `RUST_LOG`
//! wins over the configured level.

use std::path::Path;

use kestrel_config::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Level used when neither `RUST_LOG` nor the config names one.
pub const DEFAULT_FILTER: &str = "info";

/// Log file written in debug builds.
pub const LOG_FILE: &str = "kestrel.log";

/// Filter string taken from `config`, else [`DEFAULT_FILTER`].
pub fn filter_directive(config: Option<&Config>) -> String {
    config
        .map(|c| c.debug.log_level.trim())
        .filter(|level| !level.is_empty())
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

fn env_filter(config: Option<&Config>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(config)))
}

/// Installs the global subscriber.
///
/// * `log_dir` - directory for the JSON log file (debug builds only)
/// * `debug_build` - enables the file layer
/// * `config` - supplies `debug.log_level`
///
/// Panics if a global subscriber is already installed; see
/// [`try_init_logging`].
///
/// ```no_run
/// use kestrel_log::init_logging;
///
/// init_logging(Some(std::path::Path::new("./logs")), cfg!(debug_assertions), None);
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    if let Err(e) = try_init_logging(log_dir, debug_build, config) {
        panic!("failed to install tracing subscriber: {e}");
    }
}

/// Like [`init_logging`], but reports an already-installed subscriber as an
/// error instead of panicking. A listen server that shares a process with a
/// client calls this.
pub fn try_init_logging(
    log_dir: Option<&Path>,
    debug_build: bool,
    config: Option<&Config>,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join(LOG_FILE))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        return subscriber.with(file_layer).try_init();
    }

    subscriber.try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(filter_directive(None), "info");

        let mut config = Config::default();
        config.debug.log_level = "  ".into();
        assert_eq!(filter_directive(Some(&config)), "info");
    }

    #[test]
    fn test_config_directive() {
        let mut config = Config::default();
        config.debug.log_level = "debug,kestrel_net=trace".into();
        assert_eq!(filter_directive(Some(&config)), "debug,kestrel_net=trace");
        let filter = EnvFilter::new(filter_directive(Some(&config)));
        assert!(filter.to_string().contains("kestrel_net=trace"));
    }

    #[test]
    fn test_chat_target_filter_parses() {
        for directive in ["info", "warn,chat=info", "debug,kestrel_multiplayer=trace"] {
            assert!(EnvFilter::try_new(directive).is_ok(), "{directive}");
        }
    }

    #[test]
    fn test_second_install_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // Whichever call installs first, the next one fails.
        let _ = try_init_logging(Some(dir.path()), true, None);
        assert!(try_init_logging(None, false, None).is_err());
    }
}
