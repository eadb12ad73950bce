use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::connectivity::MonitorConfig;
use crate::hook::HookSettings;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub hooks: HooksConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  pub base_url: String,
  /// Extra hostnames treated as backend-bound (e.g. the upload provider).
  /// `*.example.com` matches any subdomain.
  #[serde(default)]
  pub hosts: Vec<String>,
  /// Custom title for header (defaults to the backend host if not set)
  pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// Consecutive failures before the indicator shows DEGRADED
  pub failure_threshold: u32,
  /// Extra error message fragments that identify a request blocker
  pub blocker_signatures: Vec<String>,
  pub link_check_interval_secs: u64,
  pub probe: ProbeConfig,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      failure_threshold: MonitorConfig::default().failure_threshold,
      blocker_signatures: Vec::new(),
      link_check_interval_secs: 10,
      probe: ProbeConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
  pub enabled: bool,
}

impl Default for ProbeConfig {
  fn default() -> Self {
    Self { enabled: true }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
  pub max_attempts: u32,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      base_delay_ms: 500,
      max_delay_ms: 8000,
      max_attempts: 4,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
  pub fetch_timeout_ms: u64,
  pub cache_ttl_secs: u64,
}

impl Default for HooksConfig {
  fn default() -> Self {
    Self {
      fetch_timeout_ms: 2500,
      cache_ttl_secs: 300,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Keep snapshots on disk across restarts
  pub persistent: bool,
  /// Database path (default: $XDG_DATA_HOME/acon/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      persistent: true,
      path: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./acon.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/acon/config.yaml
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/acon/config.yaml\n\
                 with at least:\n\n  backend:\n    base_url: https://api.example.com/"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("acon.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("acon").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub(crate) fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.base_url()?;
    Ok(config)
  }

  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.backend.base_url)
      .map_err(|e| eyre!("Invalid backend.base_url {}: {}", self.backend.base_url, e))
  }

  /// Hosts whose traffic goes through the interceptor: the base URL's host
  /// plus any configured extras.
  pub fn backend_hosts(&self) -> Result<Vec<String>> {
    let base = self.base_url()?;
    let host = base
      .host_str()
      .ok_or_else(|| eyre!("backend.base_url has no host: {}", base))?;
    let mut hosts = vec![host.to_string()];
    hosts.extend(self.backend.hosts.iter().cloned());
    Ok(hosts)
  }

  pub fn title(&self) -> String {
    match &self.backend.title {
      Some(title) => title.clone(),
      None => self
        .base_url()
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "acon".to_string()),
    }
  }

  pub fn monitor_config(&self) -> MonitorConfig {
    MonitorConfig {
      failure_threshold: self.connectivity.failure_threshold.max(1),
    }
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      base_delay: Duration::from_millis(self.retry.base_delay_ms),
      max_delay: Duration::from_millis(self.retry.max_delay_ms),
      max_attempts: self.retry.max_attempts.max(1),
    }
  }

  pub fn hook_settings(&self) -> HookSettings {
    HookSettings {
      fetch_timeout: Duration::from_millis(self.hooks.fetch_timeout_ms),
      cache_ttl: Duration::from_secs(self.hooks.cache_ttl_secs),
      retry: self.retry_policy(),
    }
  }

  pub fn link_check_interval(&self) -> Duration {
    Duration::from_secs(self.connectivity.link_check_interval_secs.max(1))
  }

  /// Get the API token from environment variables.
  ///
  /// Checks ACON_API_TOKEN first, then ACON_TOKEN as fallback. Without a
  /// token requests go out anonymously.
  pub fn get_api_token() -> Option<String> {
    std::env::var("ACON_API_TOKEN")
      .or_else(|_| std::env::var("ACON_TOKEN"))
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}
