//! Tracing initialisation.
//!
//! `RUST_LOG` takes precedence over the configured level so individual
//! modules can be filtered without editing the configuration:
//!
//! ```text
//! RUST_LOG=laser_align::sequence=trace laser_align simulate
//! ```

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ScanConfig;
use crate::error::{ScanError, ScanResult};

/// Installs a global fmt subscriber at `level`.
///
/// Calling it again once a subscriber is installed is a no-op.
pub fn init(level: &str) -> ScanResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| {
            ScanError::Configuration(format!("invalid log level '{}': {}", level, e))
        })?,
    };

    // Err here only means a subscriber is already installed.
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
    Ok(())
}

/// Initialises tracing from the application section of `config`.
pub fn init_from_config(config: &ScanConfig) -> ScanResult<()> {
    init(&config.application.log_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init("debug").is_ok());
        assert!(init("info").is_ok());
    }
}
