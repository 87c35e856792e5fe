//! Logging bootstrap.
//!
//! `corewarden` never installs a global subscriber on its own — library code
//! only emits `tracing` events. [`init_tracing`] is a convenience a host
//! binary (such as `corewarden-cli`) can call once at startup.

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber reading `RUST_LOG` (default `info`).
///
/// Safe to call more than once; subsequent calls are no-ops if a global
/// subscriber is already installed.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .try_init();
}
