//! Shared helpers for the demo binaries.

use std::env;
use std::sync::Once;
use tracing::Level;

static INIT: Once = Once::new();

/// Installs a formatting subscriber once.
///
/// The level comes from the `LOGLEVEL` environment variable (`DEBUG`,
/// `INFO`, `WARN`, `ERROR`, `TRACE`) and defaults to `INFO`.
pub fn setup_logger() {
    INIT.call_once(|| {
        let level = match env::var("LOGLEVEL")
            .unwrap_or_else(|_| "INFO".to_string())
            .to_uppercase()
            .as_str()
        {
            "DEBUG" => Level::DEBUG,
            "ERROR" => Level::ERROR,
            "WARN" => Level::WARN,
            "TRACE" => Level::TRACE,
            _ => Level::INFO,
        };
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .init();
    });
}
