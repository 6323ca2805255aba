//! Logging setup from `[logging]`
//!
//! `RUST_LOG`, when set, takes precedence over `logging.level`.

use crate::config::LoggingConfig;
use crate::error::{KiteflowError, Result};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Build the env filter for a config
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| KiteflowError::Config(format!("Invalid log level '{}': {}", config.level, e))),
    }
}

fn format_layer(config: &LoggingConfig) -> Result<BoxedLayer> {
    let layer = match config.format.as_str() {
        "json" => {
            let layer = fmt::layer().json().with_current_span(false);
            if config.timestamps {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        }
        "pretty" => {
            let layer = fmt::layer().pretty().with_ansi(config.colored);
            if config.timestamps {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        }
        "compact" => {
            let layer = fmt::layer().compact().with_ansi(config.colored).with_target(false);
            if config.timestamps {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        }
        other => {
            return Err(KiteflowError::Config(format!(
                "Unknown log format '{}', expected compact, pretty or json",
                other
            )))
        }
    };
    Ok(layer)
}

/// Install the global subscriber; call once at startup
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let layer = format_layer(config)?;

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| KiteflowError::Config(format!("Failed to initialize logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_format_rejected() {
        let config = LoggingConfig {
            format: "xml".to_string(),
            ..Default::default()
        };
        assert!(format_layer(&config).is_err());
    }

    #[test]
    fn test_known_formats_build() {
        for format in ["compact", "pretty", "json"] {
            for timestamps in [true, false] {
                let config = LoggingConfig {
                    format: format.to_string(),
                    timestamps,
                    ..Default::default()
                };
                assert!(format_layer(&config).is_ok(), "{} / {}", format, timestamps);
            }
        }
    }
}
