//! Application configuration module
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `FLOORSYNC_*` environment variables. Every layer goes through
//! [`AppConfigBuilder`] and the result is validated once in `build()`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default server URL
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";

/// Environment variable naming an optional TOML config file
pub const CONFIG_PATH_ENV: &str = "FLOORSYNC_CONFIG";

const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_REFRESH_MIN_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_MAX_REJECTIONS: u32 = 5;

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Base URL of the factory-operations API
    pub server_url: String,
    /// Period of the background drain timer
    pub sync_interval: Duration,
    /// Minimum spacing between two session refresh attempts
    pub refresh_min_interval: Duration,
    /// Upper bound on a single refresh call
    pub refresh_timeout: Duration,
    /// Upper bound on a single mutation dispatch
    pub dispatch_timeout: Duration,
    /// Rejections tolerated before an item is quarantined
    pub max_rejections: u32,
    /// Period of the reachability probe
    pub probe_interval: Duration,
    /// Location of the local SQLite file; `None` means the platform data dir
    pub database_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            sync_interval: DEFAULT_SYNC_INTERVAL,
            refresh_min_interval: DEFAULT_REFRESH_MIN_INTERVAL,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            max_rejections: DEFAULT_MAX_REJECTIONS,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            database_path: None,
        }
    }
}

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(self.server_url.clone()));
        }
        for (key, value) in [
            ("sync_interval", self.sync_interval),
            ("refresh_timeout", self.refresh_timeout),
            ("dispatch_timeout", self.dispatch_timeout),
            ("probe_interval", self.probe_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::invalid(key, "must be greater than zero"));
            }
        }
        if self.max_rejections == 0 {
            return Err(ConfigError::invalid("max_rejections", "must be at least 1"));
        }
        Ok(())
    }

    /// Parse a configuration from TOML text, on top of the defaults
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;
        Self::builder().apply_file(file).build()
    }

    /// Load defaults, then the TOML file (explicit path or `FLOORSYNC_CONFIG`),
    /// then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Self::builder();

        let env_path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        if let Some(path) = path.map(Path::to_path_buf).or(env_path) {
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            builder = builder.apply_file(toml::from_str(&text)?);
        }

        builder.apply_env_with(|key| std::env::var(key).ok())?.build()
    }
}

/// On-disk configuration shape; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub server_url: Option<String>,
    pub sync_interval_secs: Option<u64>,
    pub refresh_min_interval_secs: Option<u64>,
    pub refresh_timeout_secs: Option<u64>,
    pub dispatch_timeout_secs: Option<u64>,
    pub max_rejections: Option<u32>,
    pub probe_interval_secs: Option<u64>,
    pub database_path: Option<PathBuf>,
}

/// Builder for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    server_url: Option<String>,
    sync_interval: Option<Duration>,
    refresh_min_interval: Option<Duration>,
    refresh_timeout: Option<Duration>,
    dispatch_timeout: Option<Duration>,
    max_rejections: Option<u32>,
    probe_interval: Option<Duration>,
    database_path: Option<PathBuf>,
}

impl AppConfigBuilder {
    /// Set the server URL
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    pub fn refresh_min_interval(mut self, interval: Duration) -> Self {
        self.refresh_min_interval = Some(interval);
        self
    }

    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = Some(timeout);
        self
    }

    pub fn dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = Some(timeout);
        self
    }

    pub fn max_rejections(mut self, max: u32) -> Self {
        self.max_rejections = Some(max);
        self
    }

    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = Some(interval);
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Overlay the keys present in a parsed config file
    pub fn apply_file(mut self, file: ConfigFile) -> Self {
        if let Some(url) = file.server_url {
            self.server_url = Some(url);
        }
        if let Some(secs) = file.sync_interval_secs {
            self.sync_interval = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = file.refresh_min_interval_secs {
            self.refresh_min_interval = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = file.refresh_timeout_secs {
            self.refresh_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = file.dispatch_timeout_secs {
            self.dispatch_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(max) = file.max_rejections {
            self.max_rejections = Some(max);
        }
        if let Some(secs) = file.probe_interval_secs {
            self.probe_interval = Some(Duration::from_secs(secs));
        }
        if let Some(path) = file.database_path {
            self.database_path = Some(path);
        }
        self
    }

    /// Overlay `FLOORSYNC_*` variables resolved through `lookup`
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FLOORSYNC_API_URL") {
            self.server_url = Some(url);
        }
        if let Some(secs) = parse_env(&lookup, "FLOORSYNC_SYNC_INTERVAL_SECS")? {
            self.sync_interval = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_env(&lookup, "FLOORSYNC_REFRESH_MIN_INTERVAL_SECS")? {
            self.refresh_min_interval = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_env(&lookup, "FLOORSYNC_DISPATCH_TIMEOUT_SECS")? {
            self.dispatch_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(max) = parse_env(&lookup, "FLOORSYNC_MAX_REJECTIONS")? {
            self.max_rejections = Some(u32::try_from(max).map_err(|_| {
                ConfigError::invalid("FLOORSYNC_MAX_REJECTIONS", "value out of range")
            })?);
        }
        if let Some(path) = lookup("FLOORSYNC_DB_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        Ok(self)
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        let defaults = AppConfig::default();
        let config = AppConfig {
            server_url: self
                .server_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.server_url),
            sync_interval: self.sync_interval.unwrap_or(defaults.sync_interval),
            refresh_min_interval: self
                .refresh_min_interval
                .unwrap_or(defaults.refresh_min_interval),
            refresh_timeout: self.refresh_timeout.unwrap_or(defaults.refresh_timeout),
            dispatch_timeout: self.dispatch_timeout.unwrap_or(defaults.dispatch_timeout),
            max_rejections: self.max_rejections.unwrap_or(defaults.max_rejections),
            probe_interval: self.probe_interval.unwrap_or(defaults.probe_interval),
            database_path: self.database_path,
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_env<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, e.to_string())),
        None => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            message: message.into(),
        }
    }
}
