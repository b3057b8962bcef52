//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::core::config::{LogConfig, LogFormat};

/// Install the global `fmt` subscriber
///
/// `RUST_LOG` takes precedence over the configured filter. Returns `false`
/// when a subscriber was already installed, which leaves it in place.
pub fn init(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_keeps_first_subscriber() {
        let config = LogConfig::default();
        init(&config);
        assert!(!init(&config));
    }
}
