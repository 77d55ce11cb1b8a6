//! Global tracing subscriber setup

use crate::config::LoggingConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Filter built from `RUST_LOG`, falling back to the configured level
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| LoggingError::InvalidFilter(e.to_string())),
    }
}

/// Install the global subscriber
///
/// ANSI colours are only used when `ansi` is set, which the core derives from
/// the console capability of the host. A second call fails instead of
/// replacing the installed subscriber.
pub fn init(config: &LoggingConfig, ansi: bool) -> Result<(), LoggingError> {
    let filter = env_filter(config)?;

    let (json, plain) = if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_thread_names(config.thread_names)
            .with_target(true);
        (Some(layer), None)
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(ansi)
            .with_thread_names(config.thread_names)
            .with_target(true);
        (None, Some(layer))
    };

    let registry = Registry::default().with(filter).with(json).with(plain);

    #[cfg(feature = "tokio-console")]
    let registry = registry.with(console_subscriber::spawn());

    registry.try_init().map_err(|_| LoggingError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_from_config() {
        let config = LoggingConfig {
            level: "mirai_api=debug,warn".to_string(),
            ..LoggingConfig::default()
        };
        assert!(env_filter(&config).is_ok());
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        // The first call may lose to another test; the second never wins.
        let _ = init(&config, false);
        assert!(matches!(init(&config, false), Err(LoggingError::AlreadyInitialized)));
    }
}
