//! Tracing subscriber initialization for the `rqs` binary.
//!
//! # Priority (highest to lowest)
//!
//! 1. `RQS_LOG` env var (per-target directives, e.g. `requery_sim=debug,warn`)
//! 2. `RUST_LOG` env var
//! 3. Default level: `info`
//!
//! Logs go to stderr so result paths printed on stdout stay scriptable.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Project-specific filter variable.
pub const LOG_ENV: &str = "RQS_LOG";

const DEFAULT_DIRECTIVES: &str = "info";

/// Install the global subscriber. A second call is a no-op.
pub fn init_subscriber() {
    let stderr_is_tty = std::io::IsTerminal::is_terminal(&std::io::stderr());
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(stderr_is_tty)
        .with_target(false)
        .without_time()
        .compact();

    // Err only when a subscriber is already installed.
    let _ = tracing_subscriber::registry()
        .with(build_env_filter(std::env::var(LOG_ENV).ok().as_deref()))
        .with(fmt_layer)
        .try_init();
}

/// `RQS_LOG` directives if they parse, then `RUST_LOG`, then `info`.
fn build_env_filter(project_directives: Option<&str>) -> EnvFilter {
    if let Some(directives) = project_directives
        && let Ok(filter) = EnvFilter::try_new(directives)
    {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(DEFAULT_DIRECTIVES)
}
