//! Store manager: owns the versioned stores, seeds them and purges old ones.

use futures::future::try_join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::storage::CacheStorage;
use super::store::Store;
use crate::error::{CacheError, Result};
use crate::http::{Request, Response};
use crate::manifest::Manifest;
use crate::network::Network;

/// Manages every store persisted in one storage backend.
pub struct StoreManager<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> StoreManager<S> {
  pub fn new(storage: S) -> Self {
    Self::from_shared(Arc::new(storage))
  }

  pub fn from_shared(storage: Arc<S>) -> Self {
    Self { storage }
  }

  /// Open the store `id`, creating it empty if needed.
  pub async fn open(&self, id: &str) -> Result<Store<S>> {
    if self.storage.create_store(id)? {
      debug!(store = id, "Created store");
    }
    Ok(Store::new(id, Arc::clone(&self.storage)))
  }

  /// Handle to `id` only if it already exists.
  pub async fn existing(&self, id: &str) -> Result<Option<Store<S>>> {
    if self.storage.has_store(id)? {
      Ok(Some(Store::new(id, Arc::clone(&self.storage))))
    } else {
      Ok(None)
    }
  }

  /// Fetch every manifest entry and write them all into `store`.
  ///
  /// All entries are fetched concurrently. Any network failure or non-2xx
  /// status fails the whole seed before anything is written, so the store
  /// never ends up holding part of a manifest.
  pub async fn seed<N: Network>(
    &self,
    store: &Store<S>,
    manifest: &Manifest,
    origin: &Url,
    network: &N,
  ) -> Result<()> {
    let urls = manifest.resolve(origin)?;
    info!(store = store.id(), entries = urls.len(), "Seeding store");

    let pairs = try_join_all(urls.into_iter().map(|url| async move {
      let request = Request::get(url);
      let response = network.fetch(&request).await?;
      if !response.is_ok() {
        return Err(CacheError::BadStatus {
          url: request.url.to_string(),
          status: response.status,
        });
      }
      Ok::<_, CacheError>((request, response))
    }))
    .await?;

    store.put_all(&pairs)
  }

  /// Every store identifier currently persisted.
  pub async fn list_store_ids(&self) -> Result<BTreeSet<String>> {
    Ok(self.storage.store_ids()?.into_iter().collect())
  }

  /// Delete a store and all its entries. Returns false if it was already gone.
  pub async fn delete(&self, id: &str) -> Result<bool> {
    self.storage.delete_store(id)
  }

  pub async fn get(&self, store: &Store<S>, request: &Request) -> Result<Option<Response>> {
    store.match_request(request)
  }

  pub async fn put(&self, store: &Store<S>, request: &Request, response: &Response) -> Result<()> {
    store.put(request, response)
  }
}

impl<S: CacheStorage> Clone for StoreManager<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::http::ResponseKind;
  use crate::network::testing::MockNetwork;

  fn origin() -> Url {
    Url::parse("https://app.test/").unwrap()
  }

  fn manager() -> StoreManager<SqliteStorage> {
    StoreManager::new(SqliteStorage::in_memory().unwrap())
  }

  #[tokio::test]
  async fn test_open_is_idempotent() {
    let manager = manager();
    manager.open("app-v1").await.unwrap();
    manager.open("app-v1").await.unwrap();

    let ids = manager.list_store_ids().await.unwrap();
    assert_eq!(ids, BTreeSet::from(["app-v1".to_string()]));
  }

  #[tokio::test]
  async fn test_seed_stores_every_manifest_entry() {
    let manager = manager();
    let network = MockNetwork::new();
    network.ok("https://app.test/shell.html", "<html>");
    network.route("https://cdn.test/lib.js", 200, ResponseKind::Cors, "js");

    let store = manager.open("app-v1").await.unwrap();
    let manifest = Manifest::new(["/shell.html", "https://cdn.test/lib.js"]);
    manager.seed(&store, &manifest, &origin(), &network).await.unwrap();

    let urls: Vec<String> = store.keys().unwrap().into_iter().map(|k| k.url).collect();
    assert_eq!(urls, vec!["https://app.test/shell.html", "https://cdn.test/lib.js"]);

    let cdn = Request::get(Url::parse("https://cdn.test/lib.js").unwrap());
    let cached = manager.get(&store, &cdn).await.unwrap().unwrap();
    assert_eq!(&cached.body[..], b"js");
  }

  #[tokio::test]
  async fn test_seed_fails_whole_on_unreachable_entry() {
    let manager = manager();
    let network = MockNetwork::new();
    network.ok("https://app.test/shell.html", "<html>");

    let store = manager.open("app-v1").await.unwrap();
    let manifest = Manifest::new(["/shell.html", "/style.css"]);
    let err = manager
      .seed(&store, &manifest, &origin(), &network)
      .await
      .unwrap_err();

    assert!(matches!(err, CacheError::Fetch(_)));
    assert!(store.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_seed_fails_on_error_status() {
    let manager = manager();
    let network = MockNetwork::new();
    network.ok("https://app.test/shell.html", "<html>");
    network.route("https://app.test/style.css", 404, ResponseKind::Basic, "");

    let store = manager.open("app-v1").await.unwrap();
    let manifest = Manifest::new(["/shell.html", "/style.css"]);
    let err = manager
      .seed(&store, &manifest, &origin(), &network)
      .await
      .unwrap_err();

    assert!(matches!(err, CacheError::BadStatus { status: 404, .. }));
    assert!(store.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_reseed_overwrites_entries() {
    let manager = manager();
    let network = MockNetwork::new();
    network.ok("https://app.test/shell.html", "first");

    let store = manager.open("app-v1").await.unwrap();
    let manifest = Manifest::new(["/shell.html"]);
    manager.seed(&store, &manifest, &origin(), &network).await.unwrap();

    network.ok("https://app.test/shell.html", "second");
    manager.seed(&store, &manifest, &origin(), &network).await.unwrap();

    assert_eq!(store.keys().unwrap().len(), 1);
    let request = Request::get(origin().join("/shell.html").unwrap());
    let cached = manager.get(&store, &request).await.unwrap().unwrap();
    assert_eq!(&cached.body[..], b"second");
  }

  #[tokio::test]
  async fn test_delete_and_existing() {
    let manager = manager();
    manager.open("app-v1").await.unwrap();

    assert!(manager.existing("app-v1").await.unwrap().is_some());
    assert!(manager.delete("app-v1").await.unwrap());
    assert!(manager.existing("app-v1").await.unwrap().is_none());
    assert!(!manager.delete("app-v1").await.unwrap());
  }

  #[tokio::test]
  async fn test_put_after_delete_fails() {
    let manager = manager();
    let store = manager.open("app-v1").await.unwrap();
    manager.delete("app-v1").await.unwrap();

    let request = Request::get(origin().join("/late.json").unwrap());
    let response = Response::new(request.url.clone(), 200, "{}");
    let err = manager.put(&store, &request, &response).await.unwrap_err();
    assert!(matches!(err, CacheError::UnknownStore(_)));
  }
}
