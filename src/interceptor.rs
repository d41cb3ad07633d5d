//! Per-request decision procedure: bypass, serve from the store, or fetch and write back.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::cache::{CacheStorage, Store};
use crate::error::FetchError;
use crate::http::{Method, Request, Response};
use crate::manifest::ExclusionRules;
use crate::network::Network;

/// Why a request was left to the host untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bypass {
  /// Only GET requests are cached
  Method,
  /// URL matched an exclusion rule
  Excluded,
  /// No active generation controls the requesting client
  Uncontrolled,
}

/// Outcome of running one request through the interceptor.
#[derive(Debug)]
pub enum Handled {
  /// Not intercepted; the host performs the request as if no cache existed.
  PassThrough(Bypass),
  /// Served from the current store without touching the network.
  Cache(Response),
  /// Served from the network.
  ///
  /// `write_back` is the detached task copying an eligible response into the
  /// store. Callers may drop it; awaiting it only observes completion.
  Network {
    response: Response,
    write_back: Option<JoinHandle<()>>,
  },
}

impl Handled {
  pub fn response(&self) -> Option<&Response> {
    match self {
      Handled::PassThrough(_) => None,
      Handled::Cache(response) | Handled::Network { response, .. } => Some(response),
    }
  }

  pub fn is_pass_through(&self) -> bool {
    matches!(self, Handled::PassThrough(_))
  }

  pub fn from_cache(&self) -> bool {
    matches!(self, Handled::Cache(_))
  }
}

/// Cache-first request handler bound to one generation's store.
pub struct RequestInterceptor<S: CacheStorage, N: Network> {
  store: Store<S>,
  network: Arc<N>,
  exclude: ExclusionRules,
}

impl<S: CacheStorage + 'static, N: Network> RequestInterceptor<S, N> {
  pub fn new(store: Store<S>, network: Arc<N>, exclude: ExclusionRules) -> Self {
    Self {
      store,
      network,
      exclude,
    }
  }

  pub fn store(&self) -> &Store<S> {
    &self.store
  }

  /// Decide how `request` is answered.
  ///
  /// Stored responses are returned as-is with no revalidation. On a miss the
  /// network response goes straight back to the caller; same-origin 200s are
  /// additionally written into the store by a background task. A network
  /// failure on a miss is returned as the error, never replaced by a
  /// synthesized response.
  pub async fn handle(&self, request: &Request) -> Result<Handled, FetchError> {
    if request.method != Method::GET {
      debug!(method = %request.method, url = %request.url, "Not intercepting non-GET request");
      return Ok(Handled::PassThrough(Bypass::Method));
    }

    if self.exclude.matches(&request.url) {
      debug!(url = %request.url, "Not intercepting excluded request");
      return Ok(Handled::PassThrough(Bypass::Excluded));
    }

    match self.store.match_request(request) {
      Ok(Some(response)) => {
        debug!(url = %request.url, store = self.store.id(), "Returning from cache");
        return Ok(Handled::Cache(response));
      }
      Ok(None) => {}
      Err(e) => {
        warn!(url = %request.url, error = %e, "Cache lookup failed, treating as miss");
      }
    }

    debug!(url = %request.url, "Fetching from network");
    let response = self.network.fetch(request).await.map_err(|e| {
      error!(url = %request.url, error = %e, "Fetch error");
      e
    })?;

    if !response.is_cacheable() {
      debug!(
        url = %request.url,
        status = response.status,
        kind = %response.kind,
        "Response not eligible for caching"
      );
      return Ok(Handled::Network {
        response,
        write_back: None,
      });
    }

    let write_back = self.spawn_write_back(request.clone(), response.clone());
    Ok(Handled::Network {
      response,
      write_back: Some(write_back),
    })
  }

  fn spawn_write_back(&self, request: Request, response: Response) -> JoinHandle<()> {
    let store = self.store.clone();
    tokio::spawn(async move {
      match store.put(&request, &response) {
        Ok(()) => debug!(url = %request.url, store = store.id(), "Cached network response"),
        Err(e) => warn!(url = %request.url, store = store.id(), error = %e, "Write-back failed"),
      }
    })
  }
}

impl<S: CacheStorage, N: Network> Clone for RequestInterceptor<S, N> {
  fn clone(&self) -> Self {
    Self {
      store: self.store.clone(),
      network: Arc::clone(&self.network),
      exclude: self.exclude.clone(),
    }
  }
}
