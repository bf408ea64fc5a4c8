//! Tracing subscriber setup.
//!
//! The phases only emit `tracing` events; embedders that want them printed
//! call [`init`] once. `JITMORPH_LOG` takes precedence over the configured
//! level and accepts full `EnvFilter` directives
//! (e.g. `jitmorph::expand=debug`).

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Environment variable holding the tracing filter.
pub const LOG_ENV_VAR: &str = "JITMORPH_LOG";

/// Build the filter from `JITMORPH_LOG`, falling back to the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(config.level.as_str()))
}

/// Install a global `fmt` subscriber.
///
/// Returns false if a global subscriber was already installed; calling this
/// more than once is harmless.
pub fn init(config: &LoggingConfig) -> bool {
    let span_events = if config.show_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_span_events(span_events)
        .with_target(true)
        .try_init()
        .is_ok()
}
