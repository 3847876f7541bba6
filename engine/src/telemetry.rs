//! Telemetry and Observability
//!
//! Handles setting up `tracing-subscriber` for structured logging.
//! Logs go to stderr so `--json` output on stdout stays machine readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Pick the effective level.
///
/// Priority: `--log` flag > `core.log_level` from config. `RUST_LOG`, when
/// set, still wins inside [`init_telemetry_with_level`].
pub fn resolve_log_level(cli_level: Option<&str>, config_level: &str) -> String {
    cli_level
        .map(str::trim)
        .filter(|level| !level.is_empty())
        .unwrap_or(config_level)
        .to_ascii_lowercase()
}

/// Initialize the tracing subscriber with the given log level.
///
/// In debug builds: pretty-printed terminal output.
/// In release builds: JSON structured output with spans.
///
/// Only the first call installs a subscriber; later calls are ignored.
pub fn init_telemetry_with_level(log_level: &str) {
    let default_filter = format!("warn,hive_engine={},sdk={}", log_level, log_level);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}

/// Initialize the tracing subscriber at "info".
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}
