//! Logging setup
//!
//! Builds the global `tracing` subscriber: an `EnvFilter` (`RUST_LOG` wins
//! over the configured level), a text or JSON formatter on stderr, and an
//! optional non-blocking file sink.

use crate::config::LoggingSettings;
use anyhow::Context;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the file writer flushing; hold it until the process exits
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Filter directive for the given verbosity flags
pub fn level_for(configured: &str, verbose: u8, quiet: bool) -> String {
    match (quiet, verbose) {
        (true, _) => "error".to_string(),
        (false, 0) => configured.to_string(),
        (false, 1) => "debug".to_string(),
        (false, _) => "trace".to_string(),
    }
}

/// Install the global subscriber
pub fn init(settings: &LoggingSettings, verbose: u8, quiet: bool) -> anyhow::Result<LogGuard> {
    let level = level_for(&settings.level, verbose, quiet);
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.is_empty() => EnvFilter::try_new(directives)?,
        _ => EnvFilter::try_new(&level).with_context(|| format!("invalid log level '{level}'"))?,
    };

    let mut layers: Vec<BoxedLayer> = vec![filter.boxed()];

    layers.push(if settings.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_target(false).with_writer(std::io::stderr).boxed()
    });

    let file_guard = match &settings.file {
        Some(path) => {
            let (layer, guard) = file_layer(path, settings.json)?;
            layers.push(layer);
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("logging already initialized")?;

    Ok(LogGuard { _file: file_guard })
}

fn file_layer(path: &Path, json: bool) -> anyhow::Result<(BoxedLayer, WorkerGuard)> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .with_context(|| format!("log file path has no file name: {}", path.display()))?;
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    let layer = if json {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer().with_ansi(false).with_writer(writer).boxed()
    };
    Ok((layer, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_flags() {
        assert_eq!(level_for("info", 0, false), "info");
        assert_eq!(level_for("info", 1, false), "debug");
        assert_eq!(level_for("info", 3, false), "trace");
        assert_eq!(level_for("debug", 2, true), "error");
    }
}
