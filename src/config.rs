use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub sync: SyncSettings,
  #[serde(default)]
  pub cache: CacheSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL of the REST backend (e.g. "https://study.example.com")
  pub base_url: String,
  /// Read-mostly collection endpoint used for mirror refreshes
  #[serde(default = "default_tasks_path")]
  pub tasks_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
  /// Replay attempts before a failing operation is dropped from the queue.
  /// A number, or the string "unbounded" to retry forever.
  pub max_retries: RetryLimit,
  /// Deadline for the mirror-refresh fetch; stale data is served past it
  pub refresh_timeout_secs: u64,
  /// Deadline for each individual queue-item replay
  pub replay_timeout_secs: u64,
  /// Queue length past which a warning is logged (the queue itself is unbounded)
  pub queue_soft_cap: usize,
  /// Store location override (defaults to the platform data directory)
  pub store_path: Option<PathBuf>,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      max_retries: RetryLimit::default(),
      refresh_timeout_secs: 8,
      replay_timeout_secs: 8,
      queue_soft_cap: 500,
      store_path: None,
    }
  }
}

impl SyncSettings {
  pub fn refresh_timeout(&self) -> Duration {
    Duration::from_secs(self.refresh_timeout_secs)
  }

  pub fn replay_timeout(&self) -> Duration {
    Duration::from_secs(self.replay_timeout_secs)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
  /// App-shell URLs seeded into the precache partition on install
  pub precache: Vec<String>,
  /// Navigation fallback served when offline with nothing cached
  pub offline_page: Option<String>,
}

/// Retry ceiling for failing queue items: bounded (the default, 3 attempts)
/// keeps a poison item from growing the queue forever; "unbounded" retries
/// until the operation eventually succeeds or is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
  Bounded(u32),
  Unbounded,
}

impl Default for RetryLimit {
  fn default() -> Self {
    Self::Bounded(3)
  }
}

impl RetryLimit {
  /// True once `retry_count` failed attempts have exhausted the ceiling.
  pub fn exceeded(&self, retry_count: u32) -> bool {
    match self {
      Self::Bounded(max) => retry_count >= *max,
      Self::Unbounded => false,
    }
  }
}

impl<'de> Deserialize<'de> for RetryLimit {
  fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
      Count(u32),
      Word(String),
    }

    match Raw::deserialize(deserializer)? {
      Raw::Count(n) => Ok(Self::Bounded(n)),
      Raw::Word(w) if w == "unbounded" => Ok(Self::Unbounded),
      Raw::Word(w) => Err(serde::de::Error::custom(format!(
        "expected a retry count or \"unbounded\", got {w:?}"
      ))),
    }
  }
}

fn default_tasks_path() -> String {
  "/api/tasks".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./studysync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/studysync/config.yaml
  /// 4. ~/.config/studysync/config.yaml
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
        "No configuration file found. Create one at ~/.config/studysync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("studysync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("studysync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Bearer token for the REST backend, read from the environment so it never
  /// lives in the config file.
  pub fn get_auth_token() -> Option<String> {
    std::env::var("STUDYSYNC_TOKEN").ok().filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn write_config(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
  }

  #[test]
  fn minimal_config_gets_defaults() {
    let file = write_config("server:\n  base_url: http://localhost:3000\n");
    let config = Config::load(Some(file.path())).unwrap();

    assert_eq!(config.server.tasks_path, "/api/tasks");
    assert_eq!(config.sync.max_retries, RetryLimit::Bounded(3));
    assert_eq!(config.sync.refresh_timeout_secs, 8);
    assert_eq!(config.sync.queue_soft_cap, 500);
  }

  #[test]
  fn retry_limit_accepts_number_or_unbounded() {
    let file = write_config(
      "server:\n  base_url: http://localhost:3000\nsync:\n  max_retries: 5\n",
    );
    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.sync.max_retries, RetryLimit::Bounded(5));

    let file = write_config(
      "server:\n  base_url: http://localhost:3000\nsync:\n  max_retries: unbounded\n",
    );
    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.sync.max_retries, RetryLimit::Unbounded);

    let file = write_config(
      "server:\n  base_url: http://localhost:3000\nsync:\n  max_retries: sometimes\n",
    );
    assert!(Config::load(Some(file.path())).is_err());
  }

  #[test]
  fn retry_limit_exceeded() {
    assert!(!RetryLimit::Bounded(3).exceeded(2));
    assert!(RetryLimit::Bounded(3).exceeded(3));
    assert!(!RetryLimit::Unbounded.exceeded(u32::MAX));
  }

  #[test]
  fn missing_explicit_path_errors() {
    assert!(Config::load(Some(Path::new("/nonexistent/config.yaml"))).is_err());
  }
}
