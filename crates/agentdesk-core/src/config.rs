//! Configuration management for agentdesk.
//!
//! Loads configuration from ${AGENTDESK_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::agent::ORCHESTRATOR;

pub mod paths {
    //! Path resolution for agentdesk configuration and data directories.
    //!
    //! AGENTDESK_HOME resolution order:
    //! 1. AGENTDESK_HOME environment variable (if set)
    //! 2. ~/.config/agentdesk (default)

    use std::path::PathBuf;

    /// Returns the agentdesk home directory.
    pub fn agentdesk_home() -> PathBuf {
        if let Ok(home) = std::env::var("AGENTDESK_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".agentdesk"),
            |h| h.join(".config").join("agentdesk"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        agentdesk_home().join("config.toml")
    }

    /// Returns the directory backing the durable outbound queue.
    pub fn queue_dir() -> PathBuf {
        agentdesk_home().join("outbound")
    }

    /// Returns the directory for log files.
    pub fn logs_dir() -> PathBuf {
        agentdesk_home().join("logs")
    }
}

/// Backend endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Streaming chat endpoint (SSE response)
    pub stream_path: String,
    /// Message registration endpoint
    pub messages_path: String,
    /// Thread listing endpoint; `/{id}/messages` is appended for replay
    pub threads_path: String,
    /// Timeout for non-streaming requests in seconds
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: Config::DEFAULT_BASE_URL.to_string(),
            stream_path: "/api/chat".to_string(),
            messages_path: "/api/threads/messages".to_string(),
            threads_path: "/api/threads".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Stream interpretation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Seconds without any frame before the stream is treated as dropped
    pub idle_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 120,
        }
    }
}

impl StreamConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1))
    }
}

/// Outbound queue retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Interval between background flushes in seconds
    pub flush_interval_secs: u64,
    /// First retry delay in milliseconds; doubles per failed attempt
    pub backoff_base_ms: u64,
    /// Upper bound for the retry delay in seconds
    pub backoff_max_secs: u64,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 30,
            backoff_base_ms: 1000,
            backoff_max_secs: 300,
        }
    }
}

impl OutboundConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by AGENTDESK_LOG)
    pub level: String,
    /// Write logs to a daily file under the logs directory instead of stderr
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: true,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent that receives new conversations
    pub agent_slug: String,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub outbound: OutboundConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_slug: ORCHESTRATOR.to_string(),
            api: ApiConfig::default(),
            stream: StreamConfig::default(),
            outbound: OutboundConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    const DEFAULT_BASE_URL: &str = "http://localhost:8000";
    const BASE_URL_ENV: &str = "AGENTDESK_BASE_URL";

    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Resolves the backend base URL with precedence: env > config > default.
    pub fn effective_base_url(&self) -> Result<String> {
        resolve_base_url(
            std::env::var(Self::BASE_URL_ENV).ok().as_deref(),
            Some(&self.api.base_url),
            Self::DEFAULT_BASE_URL,
        )
    }

    /// Writes the default config template if no config exists yet.
    ///
    /// Returns false when a config file is already present.
    pub fn init_default(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, default_config_template())
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(true)
    }
}

/// Resolves a base URL with precedence: env > config > default.
fn resolve_base_url(
    env_value: Option<&str>,
    config_value: Option<&str>,
    default_url: &str,
) -> Result<String> {
    for candidate in [env_value, config_value].into_iter().flatten() {
        let trimmed = candidate.trim().trim_end_matches('/');
        if !trimmed.is_empty() {
            validate_url(trimmed)?;
            return Ok(trimmed.to_string());
        }
    }
    Ok(default_url.to_string())
}

fn validate_url(url: &str) -> Result<()> {
    let parsed =
        url::Url::parse(url).with_context(|| format!("Invalid agentdesk base URL: {url}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("Unsupported scheme in base URL: {url}");
    }
    Ok(())
}

fn default_config_template() -> &'static str {
    r#"# agentdesk configuration

# Agent that receives new conversations
agent_slug = "orchestrator"

[api]
base_url = "http://localhost:8000"
stream_path = "/api/chat"
messages_path = "/api/threads/messages"
threads_path = "/api/threads"
request_timeout_secs = 30

[stream]
# Seconds without a frame before the stream is treated as dropped
idle_timeout_secs = 120

[outbound]
flush_interval_secs = 30
backoff_base_ms = 1000
backoff_max_secs = 300

[logging]
level = "info"
file = true
"#
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.agent_slug, "orchestrator");
        assert_eq!(config.stream.idle_timeout_secs, 120);
        assert_eq!(config.api.stream_path, "/api/chat");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[outbound]\nbackoff_base_ms = 50\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.outbound.backoff_base_ms, 50);
        assert_eq!(config.outbound.backoff_max_secs, 300);
        assert_eq!(config.api.base_url, "http://localhost:8000");
    }

    #[test]
    fn test_invalid_toml_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "agent_slug = [").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }

    #[test]
    fn test_default_template_parses_to_defaults() {
        let parsed: Config = toml::from_str(default_config_template()).unwrap();
        let defaults = Config::default();
        assert_eq!(parsed.agent_slug, defaults.agent_slug);
        assert_eq!(parsed.api.messages_path, defaults.api.messages_path);
        assert_eq!(
            parsed.outbound.flush_interval_secs,
            defaults.outbound.flush_interval_secs
        );
    }

    #[test]
    fn test_init_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        assert!(Config::init_default(&path).unwrap());
        fs::write(&path, "agent_slug = \"custom\"\n").unwrap();
        assert!(!Config::init_default(&path).unwrap());
        assert_eq!(Config::load_from(&path).unwrap().agent_slug, "custom");
    }

    #[test]
    fn test_resolve_base_url_precedence() {
        let url = resolve_base_url(Some("http://env:1/"), Some("http://cfg:2"), "http://d").unwrap();
        assert_eq!(url, "http://env:1");

        let url = resolve_base_url(Some("  "), Some("http://cfg:2"), "http://d").unwrap();
        assert_eq!(url, "http://cfg:2");

        let url = resolve_base_url(None, None, "http://d").unwrap();
        assert_eq!(url, "http://d");
    }

    #[test]
    fn test_resolve_base_url_rejects_garbage() {
        assert!(resolve_base_url(None, Some("not a url"), "http://d").is_err());
        assert!(resolve_base_url(None, Some("ftp://host"), "http://d").is_err());
    }
}
