//! Tracing subscriber bootstrap.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, EnvConfig};

pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Builds the filter from the explicit directive, then `RUST_LOG`, then [`DEFAULT_LOG_FILTER`].
pub fn log_filter(directive: Option<&str>) -> EnvFilter {
    if let Some(directive) = directive {
        if let Ok(filter) = EnvFilter::try_new(directive) {
            return filter;
        }
    }

    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Installs the global subscriber. Returns `Ok(false)` when one was already set.
pub fn init_logging(env: &EnvConfig) -> Result<bool, ConfigError> {
    if tracing::dispatcher::has_been_set() {
        return Ok(false);
    }

    let filter = log_filter(env.log_filter.as_deref());
    let installed = match &env.log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .is_ok()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok(),
    };

    Ok(installed)
}

fn open_log_file(path: &Path) -> Result<File, ConfigError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ConfigError::Io {
            operation: "opening log file",
            path: path.to_path_buf(),
            source,
        })
}
