use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub mod formatter;

pub use formatter::*;

use crate::configs::Config;

/// Builds the filter directive from the `[logging]` section.
///
/// Noisy transport crates are capped at `warn` unless the configured filters
/// say otherwise.
pub fn filter_directive(config: &Config) -> String {
    let log_level = config
        .logging
        .as_ref()
        .and_then(|l| l.level.as_deref())
        .unwrap_or("info");

    let filters = config
        .logging
        .as_ref()
        .and_then(|l| l.filters.as_deref())
        .unwrap_or("");

    if filters.is_empty() {
        format!("{},tungstenite=warn,reqwest=warn", log_level)
    } else {
        format!("{},tungstenite=warn,reqwest=warn,{}", log_level, filters)
    }
}

/// Installs a global subscriber. `RUST_LOG` takes precedence over the config.
///
/// Hosts that already own a subscriber should not call this.
pub fn init(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    let stdout_layer = fmt::layer()
        .event_format(PegasusFormatter::new(true))
        .with_ansi(true);

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init()
    {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }
}
