//! Error types for the cache and its lifecycle.

use thiserror::Error;

/// Result type alias used across the library.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// A request reached the network and no response came back.
///
/// This is what a caller sees on a cache miss while offline. No placeholder
/// response is ever synthesized in its place.
#[derive(Debug, Clone, Error)]
#[error("fetch of {url} failed: {reason}")]
pub struct FetchError {
  pub url: String,
  pub reason: String,
}

impl FetchError {
  pub fn new(url: impl Into<String>, reason: impl ToString) -> Self {
    Self {
      url: url.into(),
      reason: reason.to_string(),
    }
  }
}

/// Errors raised by the store manager and generation controller.
#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache storage error: {0}")]
  Storage(#[from] rusqlite::Error),

  #[error("failed to encode cache entry: {0}")]
  Encoding(#[from] serde_json::Error),

  #[error("failed to create cache directory {path}: {source}")]
  CreateDir {
    path: std::path::PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("cache storage lock poisoned")]
  LockPoisoned,

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error("manifest entry {url} returned status {status}")]
  BadStatus { url: String, status: u16 },

  #[error("invalid resource locator {locator:?}: {source}")]
  InvalidLocator {
    locator: String,
    #[source]
    source: url::ParseError,
  },

  #[error("manifest lists {0} more than once")]
  DuplicateLocator(String),

  #[error("store {0} does not exist")]
  UnknownStore(String),

  #[error("invalid store identifier {0:?}")]
  InvalidStoreId(String),

  #[error("response for {0} has `Vary: *` and can never be matched")]
  Uncacheable(String),

  #[error("corrupt cache entry in {store}: {reason}")]
  CorruptEntry { store: String, reason: String },

  #[error("generation {store} is {state}, cannot {operation}")]
  InvalidTransition {
    store: String,
    state: &'static str,
    operation: &'static str,
  },
}

impl<T> From<std::sync::PoisonError<T>> for CacheError {
  fn from(_: std::sync::PoisonError<T>) -> Self {
    CacheError::LockPoisoned
  }
}
