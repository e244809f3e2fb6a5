use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::ConflictPolicy;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base url of the REST API, e.g. `https://campus.example.edu/api`
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds before a fetched entry counts as stale
  #[serde(default = "default_stale_secs")]
  pub stale_secs: i64,
  /// Keep the cache in SQLite between runs
  #[serde(default = "default_true")]
  pub persist: bool,
  #[serde(default)]
  pub conflict_policy: ConflictPolicy,
  /// Serve stale data when a refetch fails
  #[serde(default = "default_true")]
  pub offline_fallback: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_secs: default_stale_secs(),
      persist: true,
      conflict_policy: ConflictPolicy::default(),
      offline_fallback: true,
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_stale_secs() -> i64 {
  300
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./campus-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/campus-sync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(SyncError::Config(format!(
          "Config file not found: {}",
          p.display()
        )));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(SyncError::Config(
        "No configuration file found. Create one at ~/.config/campus-sync/config.yaml\n\
         See campus-sync.example.yaml for the format."
          .to_string(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("campus-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("campus-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      SyncError::Config(format!(
        "Failed to read config file {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::parse(&contents)
      .map_err(|e| SyncError::Config(format!("Failed to parse config file {}: {}", path.display(), e)))
  }

  pub fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  pub fn stale_time(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.cache.stale_secs.max(0))
  }

  pub fn timeout(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.api.timeout_secs)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks CAMPUS_SYNC_TOKEN first, then CAMPUS_API_TOKEN as fallback.
  /// Anonymous access is allowed, so a missing token is not an error.
  pub fn api_token() -> Option<String> {
    std::env::var("CAMPUS_SYNC_TOKEN")
      .or_else(|_| std::env::var("CAMPUS_API_TOKEN"))
      .ok()
      .filter(|token| !token.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  url: http://localhost:4000/api\n").unwrap();

    assert_eq!(config.api.timeout_secs, 30);
    assert_eq!(config.cache.stale_secs, 300);
    assert!(config.cache.persist);
    assert!(config.cache.offline_fallback);
    assert_eq!(config.cache.conflict_policy, ConflictPolicy::LastWriteWins);
    assert_eq!(config.stale_time(), chrono::Duration::minutes(5));
  }

  #[test]
  fn cache_section_overrides() {
    let config = Config::parse(
      r#"
api:
  url: https://campus.example.edu/api
  timeout_secs: 5
cache:
  stale_secs: 60
  persist: false
  conflict_policy: newer_wins
  offline_fallback: false
"#,
    )
    .unwrap();

    assert_eq!(config.timeout(), std::time::Duration::from_secs(5));
    assert!(!config.cache.persist);
    assert!(!config.cache.offline_fallback);
    assert_eq!(config.cache.conflict_policy, ConflictPolicy::NewerWins);
  }

  #[test]
  fn explicit_path_must_exist() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.yaml");
    let err = Config::load(Some(&missing)).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));

    let present = dir.path().join("campus.yaml");
    std::fs::write(&present, "api:\n  url: http://localhost:4000/api\n").unwrap();
    assert_eq!(Config::load(Some(&present)).unwrap().api.url, "http://localhost:4000/api");
  }

  #[test]
  fn unknown_policy_is_rejected() {
    assert!(Config::parse("api:\n  url: x\ncache:\n  conflict_policy: random\n").is_err());
  }
}
