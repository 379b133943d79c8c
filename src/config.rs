use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::store::Store;

/// Environment variable that overrides `api.base_url`.
pub const API_URL_ENV: &str = "SKILLTREE_API_URL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  /// Store location (defaults to the user data directory)
  pub database: Option<PathBuf>,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Origin of the app and its API, e.g. https://skills.example.com
  pub base_url: Option<String>,
  /// Path prefix of the API namespace
  pub prefix: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: None,
      prefix: "/api/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// When false, every lookup misses and nothing is stored
  pub enabled: bool,
  /// Generation tag embedded in partition names
  pub version: String,
  /// Static paths cached on install
  pub precache: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      version: "v1".to_string(),
      precache: vec!["/".to_string(), "/manifest.json".to_string()],
    }
  }
}

/// Which replay failures are worth another attempt.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicy {
  /// Transport failures and 408/429/5xx; other HTTP errors are dropped at once
  #[default]
  Transient,
  /// Every failure, including validation rejections
  All,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  pub max_size: usize,
  pub max_retries: u32,
  pub retry_policy: RetryPolicy,
  /// Header carrying the queued request id on replay (null disables it)
  pub idempotency_header: Option<String>,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_size: crate::queue::MAX_QUEUE_SIZE,
      max_retries: crate::queue::MAX_RETRIES,
      retry_policy: RetryPolicy::default(),
      idempotency_header: Some("Idempotency-Key".to_string()),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
  /// Path probed to derive connectivity
  pub probe_path: String,
  pub probe_interval_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 10,
      probe_path: "/api/health".to_string(),
      probe_interval_secs: 15,
    }
  }
}

impl NetworkConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Default filter directive, overridden by RUST_LOG
  pub level: String,
  /// Directory for log files (defaults to the user data directory)
  pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      dir: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./skilltree-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/skilltree-offline/config.yaml
  ///
  /// With no file found, defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("skilltree-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("skilltree-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let mut config: Config = serde_yaml::from_str(contents)?;
    // "/api" would otherwise also match "/apis.html"
    if !config.api.prefix.ends_with('/') {
      config.api.prefix.push('/');
    }
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.queue.max_size == 0 {
      return Err(eyre!("queue.max_size must be at least 1"));
    }
    if !self.api.prefix.starts_with('/') || !self.api.prefix.ends_with('/') {
      return Err(eyre!(
        "api.prefix must start and end with '/', got '{}'",
        self.api.prefix
      ));
    }
    if self.cache.version.trim().is_empty() {
      return Err(eyre!("cache.version must not be empty"));
    }
    Ok(())
  }

  /// Get the API base URL.
  ///
  /// Checks SKILLTREE_API_URL first, then `api.base_url`.
  pub fn base_url(&self) -> Result<Url> {
    let raw = std::env::var(API_URL_ENV)
      .ok()
      .or_else(|| self.api.base_url.clone())
      .ok_or_else(|| {
        eyre!(
          "API base URL not configured. Set api.base_url or the {} environment variable.",
          API_URL_ENV
        )
      })?;

    Url::parse(&raw).map_err(|e| eyre!("Invalid API base URL '{}': {}", raw, e))
  }

  /// Get the store path.
  pub fn store_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => Store::default_path(),
    }
  }
}
