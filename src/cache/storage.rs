//! Cache storage trait and SQLite implementation.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use url::Url;

use crate::error::{CacheError, Result};
use crate::http::{Headers, RequestKey, Response, ResponseKind};

/// A stored response together with the request details needed to match it.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub key: RequestKey,
  pub response: Response,
  /// Request header values named by the response's `Vary` header, captured at write time
  pub vary: BTreeMap<String, Option<String>>,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Implementations must serialize writes to the same key themselves; callers
/// never take a lock around them and rely on last-write-wins.
pub trait CacheStorage: Send + Sync {
  /// Create a store if it does not exist. Returns true when it was created.
  fn create_store(&self, store: &str) -> Result<bool>;

  /// Whether a store with this identifier exists.
  fn has_store(&self, store: &str) -> Result<bool>;

  /// All persisted store identifiers.
  fn store_ids(&self) -> Result<Vec<String>>;

  /// Delete a store and every entry in it. Returns false if it did not exist.
  fn delete_store(&self, store: &str) -> Result<bool>;

  /// Exact lookup by normalized request key.
  fn get_entry(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Insert or replace entries atomically: either all are written or none.
  fn put_entries(&self, store: &str, entries: &[CachedEntry]) -> Result<()>;

  /// Request keys in insertion order.
  fn entry_keys(&self, store: &str) -> Result<Vec<RequestKey>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path())
  }

  /// Open or create the storage database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent).map_err(|source| CacheError::CreateDir {
          path: parent.to_path_buf(),
          source,
        })?;
      }
    }

    let conn = Connection::open(path)?;
    Self::with_connection(conn)
  }

  /// Storage that lives only as long as this value.
  pub fn in_memory() -> Result<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> PathBuf {
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .unwrap_or_else(|| PathBuf::from("."))
      .join("shellcache")
      .join("stores.db")
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS stores (
    store_id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS entries (
    store_id TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    kind TEXT NOT NULL,
    redirected INTEGER NOT NULL,
    headers TEXT NOT NULL,
    vary TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_id, method, url),
    FOREIGN KEY (store_id) REFERENCES stores(store_id) ON DELETE CASCADE
);
"#;

/// Columns as they come out of SQLite, before any parsing that can fail.
struct EntryRow {
  response_url: String,
  status: u16,
  kind: String,
  redirected: bool,
  headers: String,
  vary: String,
  body: Vec<u8>,
  cached_at: String,
}

impl EntryRow {
  fn into_entry(self, store: &str, key: RequestKey) -> Result<CachedEntry> {
    let corrupt = |reason: String| CacheError::CorruptEntry {
      store: store.to_string(),
      reason,
    };

    let url = Url::parse(&self.response_url)
      .map_err(|e| corrupt(format!("bad url {:?}: {}", self.response_url, e)))?;
    let kind =
      ResponseKind::parse(&self.kind).ok_or_else(|| corrupt(format!("bad kind {:?}", self.kind)))?;
    let headers: Headers = serde_json::from_str(&self.headers)?;
    let vary = serde_json::from_str(&self.vary)?;
    let cached_at = parse_datetime(&self.cached_at).map_err(corrupt)?;

    Ok(CachedEntry {
      key,
      response: Response {
        url,
        status: self.status,
        headers,
        body: Bytes::from(self.body),
        kind,
        redirected: self.redirected,
      },
      vary,
      cached_at,
    })
  }
}

impl CacheStorage for SqliteStorage {
  fn create_store(&self, store: &str) -> Result<bool> {
    let conn = self.conn.lock()?;
    let inserted = conn.execute(
      "INSERT OR IGNORE INTO stores (store_id) VALUES (?)",
      params![store],
    )?;
    Ok(inserted > 0)
  }

  fn has_store(&self, store: &str) -> Result<bool> {
    let conn = self.conn.lock()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM stores WHERE store_id = ?",
        params![store],
        |row| row.get(0),
      )
      .optional()?;
    Ok(found.is_some())
  }

  fn store_ids(&self) -> Result<Vec<String>> {
    let conn = self.conn.lock()?;
    let mut stmt = conn.prepare("SELECT store_id FROM stores ORDER BY store_id")?;
    let ids = stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
  }

  fn delete_store(&self, store: &str) -> Result<bool> {
    let mut conn = self.conn.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM entries WHERE store_id = ?", params![store])?;
    let removed = tx.execute("DELETE FROM stores WHERE store_id = ?", params![store])?;
    tx.commit()?;
    Ok(removed > 0)
  }

  fn get_entry(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let row = {
      let conn = self.conn.lock()?;
      conn
        .query_row(
          "SELECT response_url, status, kind, redirected, headers, vary, body, cached_at
           FROM entries WHERE store_id = ? AND method = ? AND url = ?",
          params![store, key.method, key.url],
          |row| {
            Ok(EntryRow {
              response_url: row.get(0)?,
              status: row.get(1)?,
              kind: row.get(2)?,
              redirected: row.get(3)?,
              headers: row.get(4)?,
              vary: row.get(5)?,
              body: row.get(6)?,
              cached_at: row.get(7)?,
            })
          },
        )
        .optional()?
    };

    row
      .map(|row| row.into_entry(store, key.clone()))
      .transpose()
  }

  fn put_entries(&self, store: &str, entries: &[CachedEntry]) -> Result<()> {
    let mut conn = self.conn.lock()?;
    let tx = conn.transaction()?;

    let exists: Option<i64> = tx
      .query_row(
        "SELECT 1 FROM stores WHERE store_id = ?",
        params![store],
        |row| row.get(0),
      )
      .optional()?;
    if exists.is_none() {
      return Err(CacheError::UnknownStore(store.to_string()));
    }

    for entry in entries {
      let headers = serde_json::to_string(&entry.response.headers)?;
      let vary = serde_json::to_string(&entry.vary)?;
      // Replacing deletes first so a rewritten key moves to the end of the insertion order
      tx.execute(
        "DELETE FROM entries WHERE store_id = ? AND method = ? AND url = ?",
        params![store, entry.key.method, entry.key.url],
      )?;
      tx.execute(
        "INSERT INTO entries
           (store_id, method, url, response_url, status, kind, redirected, headers, vary, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          store,
          entry.key.method,
          entry.key.url,
          entry.response.url.as_str(),
          entry.response.status,
          entry.response.kind.as_str(),
          entry.response.redirected,
          headers,
          vary,
          &entry.response.body[..],
          format_datetime(&entry.cached_at),
        ],
      )?;
    }

    tx.commit()?;
    Ok(())
  }

  fn entry_keys(&self, store: &str) -> Result<Vec<RequestKey>> {
    let conn = self.conn.lock()?;
    let mut stmt =
      conn.prepare("SELECT method, url FROM entries WHERE store_id = ? ORDER BY rowid")?;
    let keys = stmt
      .query_map(params![store], |row| {
        Ok(RequestKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(keys)
  }
}

/// Format a timestamp the way SQLite's `datetime('now')` does.
fn format_datetime(dt: &DateTime<Utc>) -> String {
  dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> std::result::Result<DateTime<Utc>, String> {
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| format!("bad timestamp {:?}: {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::{Method, Request};

  fn entry(url: &str, body: &'static str) -> CachedEntry {
    let url = Url::parse(url).unwrap();
    CachedEntry {
      key: Request::get(url.clone()).key(),
      response: Response::new(url, 200, body).with_header("Content-Type", "text/plain"),
      vary: BTreeMap::new(),
      cached_at: Utc::now(),
    }
  }

  #[test]
  fn test_create_store_is_idempotent() {
    let storage = SqliteStorage::in_memory().unwrap();
    assert!(storage.create_store("app-v1").unwrap());
    assert!(!storage.create_store("app-v1").unwrap());
    assert_eq!(storage.store_ids().unwrap(), vec!["app-v1".to_string()]);
  }

  #[test]
  fn test_put_and_get_entry() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.create_store("app-v1").unwrap();
    let e = entry("https://app.test/shell.html", "<html>");
    storage.put_entries("app-v1", &[e.clone()]).unwrap();

    let found = storage.get_entry("app-v1", &e.key).unwrap().unwrap();
    assert_eq!(found.response.body, Bytes::from_static(b"<html>"));
    assert_eq!(found.response.headers.get("content-type"), Some("text/plain"));
    assert_eq!(found.response.kind, ResponseKind::Basic);
    assert_eq!(found.key, e.key);
  }

  #[test]
  fn test_get_is_exact_match() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.create_store("app-v1").unwrap();
    storage
      .put_entries("app-v1", &[entry("https://app.test/shell.html", "a")])
      .unwrap();

    let other = Request::get(Url::parse("https://app.test/shell").unwrap()).key();
    assert!(storage.get_entry("app-v1", &other).unwrap().is_none());

    let post = RequestKey::new(
      &Method::POST,
      &Url::parse("https://app.test/shell.html").unwrap(),
    );
    assert!(storage.get_entry("app-v1", &post).unwrap().is_none());
  }

  #[test]
  fn test_put_replaces_existing_key() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.create_store("app-v1").unwrap();
    storage
      .put_entries("app-v1", &[entry("https://app.test/a", "old")])
      .unwrap();
    storage
      .put_entries("app-v1", &[entry("https://app.test/a", "new")])
      .unwrap();

    let keys = storage.entry_keys("app-v1").unwrap();
    assert_eq!(keys.len(), 1);
    let found = storage.get_entry("app-v1", &keys[0]).unwrap().unwrap();
    assert_eq!(found.response.body, Bytes::from_static(b"new"));
  }

  #[test]
  fn test_put_into_missing_store_fails() {
    let storage = SqliteStorage::in_memory().unwrap();
    let err = storage
      .put_entries("gone-v1", &[entry("https://app.test/a", "x")])
      .unwrap_err();
    assert!(matches!(err, CacheError::UnknownStore(id) if id == "gone-v1"));
  }

  #[test]
  fn test_delete_store_removes_entries() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.create_store("app-v1").unwrap();
    storage.create_store("app-v2").unwrap();
    let e = entry("https://app.test/a", "x");
    storage.put_entries("app-v1", &[e.clone()]).unwrap();
    storage.put_entries("app-v2", &[e.clone()]).unwrap();

    assert!(storage.delete_store("app-v1").unwrap());
    assert!(!storage.delete_store("app-v1").unwrap());
    assert_eq!(storage.store_ids().unwrap(), vec!["app-v2".to_string()]);
    assert!(storage.entry_keys("app-v1").unwrap().is_empty());
    assert!(storage.get_entry("app-v2", &e.key).unwrap().is_some());
  }

  #[test]
  fn test_entry_keys_in_insertion_order() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.create_store("app-v1").unwrap();
    storage
      .put_entries(
        "app-v1",
        &[
          entry("https://app.test/shell.html", "a"),
          entry("https://app.test/style.css", "b"),
        ],
      )
      .unwrap();

    let urls: Vec<String> = storage
      .entry_keys("app-v1")
      .unwrap()
      .into_iter()
      .map(|k| k.url)
      .collect();
    assert_eq!(
      urls,
      vec!["https://app.test/shell.html", "https://app.test/style.css"]
    );
  }

  #[test]
  fn test_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("stores.db");
    let e = entry("https://app.test/a", "persisted");

    {
      let storage = SqliteStorage::open_at(&path).unwrap();
      storage.create_store("app-v1").unwrap();
      storage.put_entries("app-v1", &[e.clone()]).unwrap();
    }

    let storage = SqliteStorage::open_at(&path).unwrap();
    assert!(storage.has_store("app-v1").unwrap());
    let found = storage.get_entry("app-v1", &e.key).unwrap().unwrap();
    assert_eq!(found.response.body, Bytes::from_static(b"persisted"));
  }
}
