//! Versioned store identifiers and the handle used to read and write one store.

use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::storage::{CacheStorage, CachedEntry};
use crate::error::{CacheError, Result};
use crate::http::{Request, RequestKey, Response};

/// Store identifier of the form `<name>-v<N>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreId {
  name: String,
  version: u32,
}

impl StoreId {
  pub fn new(name: impl Into<String>, version: u32) -> Self {
    Self {
      name: name.into(),
      version,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn version(&self) -> u32 {
    self.version
  }
}

impl fmt::Display for StoreId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-v{}", self.name, self.version)
  }
}

impl FromStr for StoreId {
  type Err = CacheError;

  fn from_str(s: &str) -> Result<Self> {
    let invalid = || CacheError::InvalidStoreId(s.to_string());
    let (name, version) = s.rsplit_once("-v").ok_or_else(invalid)?;
    if name.is_empty() || version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
      return Err(invalid());
    }
    let version = version.parse().map_err(|_| invalid())?;
    Ok(Self::new(name, version))
  }
}

/// Handle to one named store.
///
/// Cloning is cheap; clones share the same storage backend.
pub struct Store<S: CacheStorage> {
  id: String,
  storage: Arc<S>,
}

impl<S: CacheStorage> Store<S> {
  pub(crate) fn new(id: impl Into<String>, storage: Arc<S>) -> Self {
    Self {
      id: id.into(),
      storage,
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  /// Look up the response stored for `request`.
  ///
  /// Matching is exact on method and fragment-less URL. If the stored
  /// response varied on request headers, those must match as well.
  pub fn match_request(&self, request: &Request) -> Result<Option<Response>> {
    let Some(entry) = self.storage.get_entry(&self.id, &request.key())? else {
      return Ok(None);
    };

    let vary_matches = entry
      .vary
      .iter()
      .all(|(name, value)| request.headers.get(name) == value.as_deref());

    Ok(vary_matches.then_some(entry.response))
  }

  /// Insert or replace the entry for `request`.
  pub fn put(&self, request: &Request, response: &Response) -> Result<()> {
    let entry = Self::entry(request, response)?;
    self.storage.put_entries(&self.id, &[entry])
  }

  /// Insert or replace several entries in one transaction.
  pub fn put_all(&self, pairs: &[(Request, Response)]) -> Result<()> {
    let entries = pairs
      .iter()
      .map(|(request, response)| Self::entry(request, response))
      .collect::<Result<Vec<_>>>()?;
    self.storage.put_entries(&self.id, &entries)
  }

  /// Request keys currently stored, oldest first.
  pub fn keys(&self) -> Result<Vec<RequestKey>> {
    self.storage.entry_keys(&self.id)
  }

  fn entry(request: &Request, response: &Response) -> Result<CachedEntry> {
    Ok(CachedEntry {
      key: request.key(),
      response: response.clone(),
      vary: vary_snapshot(request, response)?,
      cached_at: Utc::now(),
    })
  }
}

impl<S: CacheStorage> Clone for Store<S> {
  fn clone(&self) -> Self {
    Self {
      id: self.id.clone(),
      storage: Arc::clone(&self.storage),
    }
  }
}

impl<S: CacheStorage> fmt::Debug for Store<S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Store").field("id", &self.id).finish()
  }
}

/// Capture the request header values named by the response's `Vary` header.
fn vary_snapshot(request: &Request, response: &Response) -> Result<BTreeMap<String, Option<String>>> {
  let mut snapshot = BTreeMap::new();
  let Some(vary) = response.headers.get("vary") else {
    return Ok(snapshot);
  };

  for name in vary.split(',').map(str::trim).filter(|n| !n.is_empty()) {
    if name == "*" {
      return Err(CacheError::Uncacheable(request.url.to_string()));
    }
    let name = name.to_ascii_lowercase();
    let value = request.headers.get(&name).map(String::from);
    snapshot.insert(name, value);
  }

  Ok(snapshot)
}
