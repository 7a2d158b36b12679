use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Browser identity presented to origins on the primary fetch.
pub const DEFAULT_BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Minimal identity used for the single edge-error retry.
pub const DEFAULT_FALLBACK_USER_AGENT: &str = "VLC/3.0.0";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub relay: RelayConfig,
    pub player: PlayerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Externally visible origin (e.g. `https://tv.example.com`). When unset the
    /// relay base is derived from each request's Host header.
    pub public_base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 7860,
            public_base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Upstream fetch behaviour for the relay and the redirect resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub browser_user_agent: String,
    pub fallback_user_agent: String,
    /// HEAD probe used by the diagnostics endpoint and the relay pre-check
    pub probe_timeout_secs: u64,
    /// HEAD probe used by the resolve endpoint
    pub resolve_timeout_secs: u64,
    /// Each non-following HEAD while walking a redirect chain
    pub reachability_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub retry_fetch_timeout_secs: u64,
    pub max_redirects: usize,
    pub resolve_max_redirects: usize,
    pub precheck_redirects: bool,
    pub edge_error_status: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            browser_user_agent: DEFAULT_BROWSER_USER_AGENT.to_string(),
            fallback_user_agent: DEFAULT_FALLBACK_USER_AGENT.to_string(),
            probe_timeout_secs: 10,
            resolve_timeout_secs: 15,
            reachability_timeout_secs: 5,
            fetch_timeout_secs: 30,
            retry_fetch_timeout_secs: 20,
            max_redirects: 5,
            resolve_max_redirects: 10,
            precheck_redirects: true,
            edge_error_status: 520,
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    #[must_use]
    pub const fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    #[must_use]
    pub const fn reachability_timeout(&self) -> Duration {
        Duration::from_secs(self.reachability_timeout_secs)
    }

    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    #[must_use]
    pub const fn retry_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.retry_fetch_timeout_secs)
    }
}

/// Backoff shape between automatic playback retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Linear,
}

/// Client playback defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff: BackoffKind,
    pub prefer_proxy: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_ms: 2000,
            backoff: BackoffKind::Linear,
            prefer_proxy: true,
        }
    }
}

impl Config {
    /// Load configuration from an optional file, then environment variables
    ///
    /// Nested keys use a double underscore: `STREAMFLOW_RELAY__FETCH_TIMEOUT_SECS=20`.
    /// The bare `PORT` variable overrides `server.http_port`.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::from(Path::new(path)));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("STREAMFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder = builder.set_override_option("server.http_port", std::env::var("PORT").ok())?;

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file with environment overrides
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Get HTTP listen address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check every bound at once so operators see all mistakes in one run.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let relay = &self.relay;

        for (name, value) in [
            ("relay.probe_timeout_secs", relay.probe_timeout_secs),
            ("relay.resolve_timeout_secs", relay.resolve_timeout_secs),
            ("relay.reachability_timeout_secs", relay.reachability_timeout_secs),
        ] {
            if !(5..=15).contains(&value) {
                errors.push(format!("{name} must be between 5 and 15 seconds, got {value}"));
            }
        }

        for (name, value) in [
            ("relay.fetch_timeout_secs", relay.fetch_timeout_secs),
            ("relay.retry_fetch_timeout_secs", relay.retry_fetch_timeout_secs),
        ] {
            if !(10..=30).contains(&value) {
                errors.push(format!("{name} must be between 10 and 30 seconds, got {value}"));
            }
        }

        if !(1..=5).contains(&relay.max_redirects) {
            errors.push(format!(
                "relay.max_redirects must be between 1 and 5, got {}",
                relay.max_redirects
            ));
        }
        if !(1..=10).contains(&relay.resolve_max_redirects) {
            errors.push(format!(
                "relay.resolve_max_redirects must be between 1 and 10, got {}",
                relay.resolve_max_redirects
            ));
        }

        if relay.browser_user_agent.trim().is_empty() {
            errors.push("relay.browser_user_agent must not be empty".to_string());
        }
        if relay.fallback_user_agent.trim().is_empty() {
            errors.push("relay.fallback_user_agent must not be empty".to_string());
        }
        if !(500..=599).contains(&relay.edge_error_status) {
            errors.push(format!(
                "relay.edge_error_status must be a 5xx code, got {}",
                relay.edge_error_status
            ));
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }

        if self.player.max_retries == 0 {
            errors.push("player.max_retries must be at least 1".to_string());
        }

        if let Some(base) = &self.server.public_base_url {
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                errors.push(format!(
                    "server.public_base_url must be an http(s) URL, got \"{base}\""
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
