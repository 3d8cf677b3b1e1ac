//! Console logging for the download and upload binaries.
//!
//! A single global `tracing` subscriber writes human-readable lines to stderr.
//! The level comes from `RUST_LOG` and defaults to `info`.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber. Subsequent calls are no-ops, and a
/// subscriber installed elsewhere (tests, embedding) is left untouched.
pub fn init() {
    INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        tracing::info!("logging initialized twice without panicking");
    }
}
