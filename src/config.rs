use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::StoreId;
use crate::manifest::{ExclusionRules, Manifest};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub store: StoreConfig,
  /// Application origin; relative manifest entries resolve against it and
  /// only responses from it are written back
  pub origin: Url,
  #[serde(default)]
  pub manifest: Manifest,
  /// URL substrings that always bypass the cache
  #[serde(default)]
  pub exclude: ExclusionRules,
  /// Activate right after install instead of waiting for old clients to close
  #[serde(default = "default_true")]
  pub skip_waiting: bool,
  /// Take over already-open clients on activation
  #[serde(default = "default_true")]
  pub claim_clients: bool,
  /// SQLite database holding every store (defaults to the XDG data dir)
  pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
  pub name: String,
  pub version: u32,
}

fn default_true() -> bool {
  true
}

/// Everything one generation of the caching logic is built from.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
  pub store_id: StoreId,
  pub origin: Url,
  pub manifest: Manifest,
  pub exclude: ExclusionRules,
  pub skip_waiting: bool,
  pub claim_clients: bool,
}

impl GenerationConfig {
  pub fn new(store_id: StoreId, origin: Url) -> Self {
    Self {
      store_id,
      origin,
      manifest: Manifest::default(),
      exclude: ExclusionRules::default(),
      skip_waiting: true,
      claim_clients: true,
    }
  }

  pub fn with_manifest(mut self, manifest: Manifest) -> Self {
    self.manifest = manifest;
    self
  }

  pub fn with_exclusions(mut self, exclude: ExclusionRules) -> Self {
    self.exclude = exclude;
    self
  }

  pub fn with_skip_waiting(mut self, skip_waiting: bool) -> Self {
    self.skip_waiting = skip_waiting;
    self
  }

  pub fn with_claim_clients(mut self, claim_clients: bool) -> Self {
    self.claim_clients = claim_clients;
    self
  }
}

/// Errors from locating or parsing the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Config file not found: {0}")]
  NotFound(PathBuf),

  #[error(
    "No configuration file found. Create one at ~/.config/shellcache/config.yaml \
     or ./shellcache.yaml"
  )]
  Missing,

  #[error("Failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(ConfigError::NotFound(p.to_path_buf()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(ConfigError::Missing),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    Self::from_yaml(&contents).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// The store identifier this deploy treats as current.
  pub fn store_id(&self) -> StoreId {
    StoreId::new(self.store.name.clone(), self.store.version)
  }

  pub fn generation(&self) -> GenerationConfig {
    GenerationConfig {
      store_id: self.store_id(),
      origin: self.origin.clone(),
      manifest: self.manifest.clone(),
      exclude: self.exclude.clone(),
      skip_waiting: self.skip_waiting,
      claim_clients: self.claim_clients,
    }
  }
}
