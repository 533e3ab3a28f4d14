//! Tracing subscriber setup.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Environment variable that overrides the configured filter.
pub const LOG_ENV_VAR: &str = "AGENTDESK_LOG";

const LOG_FILE_PREFIX: &str = "agentdesk.log";

/// Builds the filter: AGENTDESK_LOG > config level > "info".
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(config.level.trim()))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber.
///
/// With `config.file` set, logs go to a daily-rotated file in `logs_dir` and
/// the returned guard must be held until exit to flush them. Otherwise logs
/// go to stderr.
pub fn init(config: &LoggingConfig, logs_dir: &Path) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(config);

    if config.file {
        fs::create_dir_all(logs_dir)
            .with_context(|| format!("Failed to create logs directory {}", logs_dir.display()))?;
        let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer),
            )
            .try_init()
            .context("Failed to install tracing subscriber")?;
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .try_init()
            .context("Failed to install tracing subscriber")?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_falls_back() {
        let config = LoggingConfig {
            level: "not==valid[".to_string(),
            file: false,
        };
        // Must not panic; falls back to a usable filter.
        let filter = build_filter(&config);
        assert!(!filter.to_string().is_empty());
    }
}
