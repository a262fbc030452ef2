//! Logging setup shared by geoapi binaries.
//!
//! Library crates only emit `tracing` events; installing a subscriber is the
//! binary's job, done once at startup through [`init_logging`].

use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive string. Overrides
/// the verbosity flag entirely when set.
pub const LOG_ENV: &str = "GEOAPI_LOG";

const OWN_TARGETS: [&str; 3] = ["geoapi", "geoapi_core", "geoapi_client"];

/// Filter directives for a `-v` count.
///
/// 0 keeps stderr quiet apart from warnings, 1 adds job lifecycle events,
/// 2 adds every poll attempt and HTTP request, 3+ also opens up dependencies.
pub fn default_directives(verbosity: u8) -> String {
    let (global, own) = match verbosity {
        0 => return "warn".to_string(),
        1 => ("warn", "info"),
        2 => ("info", "debug"),
        _ => ("debug", "trace"),
    };
    let mut directives = global.to_string();
    for target in OWN_TARGETS {
        directives.push_str(&format!(",{target}={own}"));
    }
    directives
}

/// Install a stderr `fmt` subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init_logging(verbosity: u8) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| default_directives(verbosity).into());
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbosity >= 2)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(verbosity, "logging initialised");
    }
}
