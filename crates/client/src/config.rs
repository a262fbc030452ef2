// crates/client/src/config.rs
//! Client configuration: defaults, then a TOML file, then environment.
//!
//! ```toml
//! base_url = "https://acme.geoapi.example"
//! api_key = "..."
//! username = "acme"
//! timeout_secs = 30
//!
//! [polling]
//! interval_secs = 5.0
//!
//! [polling.kinds.batch-sql]
//! interval_secs = 1.0
//! max_attempts = 600
//!
//! [tracker]
//! minimum_update_secs = 1.0
//! refresh_policy = "skip"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use geoapi_core::{JobSpec, Palette, PollPolicy, RefreshPolicy, TrackerConfig};
use serde::Deserialize;
use thiserror::Error;

pub const ENV_CONFIG: &str = "GEOAPI_CONFIG";
pub const ENV_BASE_URL: &str = "GEOAPI_BASE_URL";
pub const ENV_API_KEY: &str = "GEOAPI_API_KEY";
pub const ENV_USERNAME: &str = "GEOAPI_USERNAME";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Missing required setting '{field}' (set it in the config file or {env})")]
    Missing {
        field: &'static str,
        env: &'static str,
    },

    #[error("base_url must start with http:// or https://, got '{0}'")]
    InvalidUrl(String),

    #[error("Invalid value for '{field}': {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }
}

/// Overrides for one job kind's poll policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollOverride {
    pub interval_secs: Option<f64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollingConfig {
    pub interval_secs: Option<f64>,
    pub max_attempts: Option<u32>,
    /// Keyed by job kind label (`import`, `batch-sql`, ...).
    pub kinds: BTreeMap<String, PollOverride>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerSettings {
    pub minimum_update_secs: f64,
    pub refresh_policy: RefreshPolicy,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            minimum_update_secs: 1.0,
            refresh_policy: RefreshPolicy::AutoSleep,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Routes requests through `/user/{username}` when set.
    pub username: Option<String>,
    pub timeout_secs: u64,
    pub polling: PollingConfig,
    pub tracker: TrackerSettings,
    pub token_store: Option<PathBuf>,
    /// `None` means colored when stdout is a terminal.
    pub color: Option<bool>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            username: None,
            timeout_secs: 30,
            polling: PollingConfig::default(),
            tracker: TrackerSettings::default(),
            token_store: None,
            color: None,
        }
    }
}

impl ClientConfig {
    /// Resolve the configuration the way the CLI does.
    ///
    /// File: `explicit`, else `$GEOAPI_CONFIG`, else the default config file
    /// when it exists. A named file that does not exist is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(ENV_CONFIG).map(PathBuf::from));
        let mut config = match named {
            Some(path) => Self::from_file(&path)?,
            None => match geoapi_core::paths::config_file() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        let config = Self::from_toml(&content, path)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Environment overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        if let Some(url) = set(lookup(ENV_BASE_URL)) {
            self.base_url = url;
        }
        if let Some(key) = set(lookup(ENV_API_KEY)) {
            self.api_key = Some(key);
        }
        if let Some(user) = set(lookup(ENV_USERNAME)) {
            self.username = Some(user);
        }
    }

    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let trimmed = self.base_url.trim().trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            return Err(ConfigError::Missing {
                field: "base_url",
                env: ENV_BASE_URL,
            });
        }
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(trimmed));
        }
        self.base_url = trimmed;

        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs", "must be at least 1"));
        }
        check_interval("polling.interval_secs", self.polling.interval_secs)?;
        check_attempts("polling.max_attempts", self.polling.max_attempts)?;
        for (kind, over) in &self.polling.kinds {
            check_interval(&format!("polling.kinds.{kind}.interval_secs"), over.interval_secs)?;
            check_attempts(&format!("polling.kinds.{kind}.max_attempts"), over.max_attempts)?;
        }
        let minimum = self.tracker.minimum_update_secs;
        if !minimum.is_finite() || minimum < 0.0 {
            return Err(invalid("tracker.minimum_update_secs", "must be zero or positive"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The kind's default policy with configured overrides applied; the
    /// kind-specific table wins over the `[polling]` globals.
    pub fn policy_for<K: JobSpec>(&self) -> PollPolicy<K::State> {
        let mut policy = K::default_policy();
        let over = self
            .polling
            .kinds
            .get(K::KIND.as_str())
            .copied()
            .unwrap_or_default();
        let interval = over
            .interval_secs
            .or(self.polling.interval_secs)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        if let Some(interval) = interval {
            policy = PollPolicy::fixed(interval, policy.max_attempts);
        }
        if let Some(attempts) = over.max_attempts.or(self.polling.max_attempts) {
            policy.max_attempts = attempts;
        }
        policy
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            minimum_update_time: Duration::try_from_secs_f64(self.tracker.minimum_update_secs)
                .unwrap_or(Duration::ZERO),
            policy: self.tracker.refresh_policy,
        }
    }

    pub fn palette(&self) -> Palette {
        self.color.map(Palette::new).unwrap_or_else(Palette::detect)
    }

    pub fn token_store_path(&self) -> Option<PathBuf> {
        self.token_store
            .clone()
            .or_else(geoapi_core::paths::token_store_path)
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn check_interval(field: &str, secs: Option<f64>) -> Result<(), ConfigError> {
    match secs {
        Some(s) if !s.is_finite() || s <= 0.0 => Err(invalid(field, "must be a positive number of seconds")),
        _ => Ok(()),
    }
}

fn check_attempts(field: &str, attempts: Option<u32>) -> Result<(), ConfigError> {
    match attempts {
        Some(0) => Err(invalid(field, "must be at least 1")),
        _ => Ok(()),
    }
}
