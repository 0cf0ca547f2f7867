//! Logging setup
//!
//! Console output always; a second, non-blocking file layer when the
//! settings name a main log file. `RUST_LOG` overrides the configured level.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{FleetError, Result};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Default filter directives for a base level
pub fn default_directives(level: &str) -> String {
    format!("{},itemfleet=debug", level.trim().to_ascii_lowercase())
}

fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directives(&config.level)).map_err(|e| {
            FleetError::InvalidConfig(format!("invalid logging.level {:?}: {e}", config.level))
        }),
    }
}

fn file_layer(path: &str) -> Result<(BoxedLayer, WorkerGuard)> {
    let path = Path::new(path);
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| FleetError::InvalidConfig(format!("main_log {} has no file name", path.display())))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(directory)?;

    let appender = Builder::new()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(directory)
        .map_err(|e| FleetError::InvalidConfig(format!("cannot open main_log {}: {e}", path.display())))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .boxed();
    Ok((layer, guard))
}

/// Install the global subscriber. Keep the returned guard alive for as long
/// as the file log should be flushed.
pub fn init_logging(config: &LoggingConfig, main_log: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(config)?;

    let console: BoxedLayer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let mut layers = vec![console];
    let mut guard = None;
    if let Some(path) = main_log {
        let (layer, file_guard) = file_layer(path)?;
        layers.push(layer);
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| FleetError::Other(anyhow::anyhow!("logging already initialised: {e}")))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(default_directives("INFO"), "info,itemfleet=debug");
        assert_eq!(default_directives(" warn "), "warn,itemfleet=debug");
    }

    #[test]
    fn test_filter_from_config_level() {
        let config = LoggingConfig {
            level: "debug".into(),
            json: false,
        };
        assert!(EnvFilter::try_new(default_directives(&config.level)).is_ok());
    }
}
