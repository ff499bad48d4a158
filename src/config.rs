use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  #[serde(default)]
  pub app: AppConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base URL of the remote API (e.g. "https://abc.supabase.co")
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Origin the static assets are served from
  pub origin: String,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      origin: "http://localhost:5173".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub static_prefix: String,
  /// Bump on deploy to invalidate the static asset generation
  pub static_version: String,
  pub data_prefix: String,
  /// Bumped independently of `static_version`
  pub data_version: String,
  /// Root-relative paths fetched during installation
  pub manifest: Vec<String>,
  pub request_timeout_secs: u64,
  /// RPC fetched by warm-up to prime the remote-data generation
  pub warm_up_rpc: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      static_prefix: "songbook-poc-cache".to_string(),
      static_version: "v1".to_string(),
      data_prefix: "song-data-cache".to_string(),
      data_version: "v1".to_string(),
      manifest: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/assets/main.css".to_string(),
        "/assets/main.js".to_string(),
      ],
      request_timeout_secs: 30,
      warm_up_rpc: "get_songs".to_string(),
    }
  }
}

impl CacheConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Directory for the song store, response cache and logs
  pub data_dir: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./songbook.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/songbook/config.yaml
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
        "No configuration file found. Create one at ~/.config/songbook/config.yaml\n\
                 with at least `remote.url` set."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("songbook.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("songbook").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.cache.manifest.is_empty() {
      return Err(eyre!("cache.manifest must list at least one asset"));
    }
    Ok(config)
  }

  /// Directory holding the databases and log files.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.storage.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("songbook"))
  }

  /// Get the remote API key from environment variables.
  ///
  /// Checks SONGBOOK_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("SONGBOOK_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!("Remote API key not found. Set SONGBOOK_API_KEY or SUPABASE_ANON_KEY environment variable.")
      })
  }
}
