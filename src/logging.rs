//! Structured logging setup
//!
//! Events go to stderr so stdout stays reserved for JSON command output.
//! `RUST_LOG` takes precedence over the configured level.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// Build the event filter: `RUST_LOG` if set and valid, else the configured level
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_ascii_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber
///
/// Installing twice (tests, embedding) keeps the first subscriber.
pub fn init_logging(config: &LoggingConfig) {
    let builder = fmt()
        .with_env_filter(env_filter(config))
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = if config.format.eq_ignore_ascii_case("json") {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };

    if installed.is_err() {
        tracing::debug!("global tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig::default();
        init_logging(&config);
        init_logging(&LoggingConfig {
            level: "debug".to_string(),
            format: "json".to_string(),
        });
        tracing::info!("logging initialised");
    }
}
