//! The hosting environment's side of the lifecycle contract.
//!
//! `Host` decides when a freshly installed generation takes over, which
//! generation answers each client's requests, and what happens to requests
//! nobody intercepts.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheStorage, StoreManager};
use crate::config::GenerationConfig;
use crate::controller::{ActivationReport, GenerationController};
use crate::error::{FetchError, Result};
use crate::http::{Request, Response};
use crate::interceptor::{Bypass, Handled, RequestInterceptor};
use crate::network::Network;

/// A page or window whose requests flow through the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

/// Result of registering a new generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
  /// The generation installed and took over.
  Activated(ActivationReport),
  /// The generation installed and waits for the old generation's clients to close.
  Waiting,
}

/// Hosting environment: owns the registration and routes client requests.
pub struct Host<S: CacheStorage, N: Network> {
  manager: StoreManager<S>,
  network: Arc<N>,
  active: Option<GenerationController<S, N>>,
  waiting: Option<GenerationController<S, N>>,
  /// Request handlers by store id, kept while any client is bound to them
  interceptors: HashMap<String, RequestInterceptor<S, N>>,
  /// Which generation's store id controls each open client
  clients: HashMap<ClientId, Option<String>>,
  next_client: u64,
}

impl<S: CacheStorage + 'static, N: Network> Host<S, N> {
  pub fn new(manager: StoreManager<S>, network: Arc<N>) -> Self {
    Self {
      manager,
      network,
      active: None,
      waiting: None,
      interceptors: HashMap::new(),
      clients: HashMap::new(),
      next_client: 0,
    }
  }

  /// Host that resumes an already-active generation from persisted storage.
  pub async fn restore(
    manager: StoreManager<S>,
    network: Arc<N>,
    config: GenerationConfig,
  ) -> Result<Self> {
    let controller =
      GenerationController::restore(config, manager.clone(), Arc::clone(&network)).await?;
    let mut host = Self::new(manager, network);
    host
      .interceptors
      .insert(controller.store_id().to_string(), controller.interceptor()?);
    host.active = Some(controller);
    Ok(host)
  }

  pub fn active_store_id(&self) -> Option<&str> {
    self.active.as_ref().map(|c| c.store_id())
  }

  pub fn waiting_store_id(&self) -> Option<&str> {
    self.waiting.as_ref().map(|c| c.store_id())
  }

  /// Store id of the generation controlling `client`, if any.
  pub fn controller_of(&self, client: ClientId) -> Option<&str> {
    self.clients.get(&client).and_then(|c| c.as_deref())
  }

  /// Install a new generation and hand over control when allowed.
  ///
  /// If install fails the new generation is discarded and the current one
  /// keeps serving; the error is returned to the caller.
  pub async fn register(&mut self, config: GenerationConfig) -> Result<Registration> {
    let mut controller =
      GenerationController::new(config, self.manager.clone(), Arc::clone(&self.network));

    let outcome = match controller.install().await {
      Ok(outcome) => outcome,
      Err(e) => {
        warn!(
          store = controller.store_id(),
          error = %e,
          active = self.active_store_id().unwrap_or("none"),
          "Discarding generation after failed install"
        );
        return Err(e);
      }
    };

    if outcome.skip_waiting || !self.active_has_clients() {
      let report = self.promote(controller).await?;
      return Ok(Registration::Activated(report));
    }

    if let Some(mut previous) = self.waiting.replace(controller) {
      previous.retire();
    }
    info!(
      store = self.waiting_store_id().unwrap_or_default(),
      "Waiting for existing clients to close"
    );
    Ok(Registration::Waiting)
  }

  /// Open a client controlled by the active generation.
  pub fn open_client(&mut self) -> ClientId {
    let id = ClientId(self.next_client);
    self.next_client += 1;
    let controller = self.active_store_id().map(String::from);
    self.clients.insert(id, controller);
    id
  }

  /// Close a client. Closing the last client of the active generation lets a
  /// waiting generation take over.
  pub async fn close_client(&mut self, client: ClientId) -> Result<Option<ActivationReport>> {
    self.clients.remove(&client);
    self.drop_unused_interceptors();

    if self.waiting.is_some() && !self.active_has_clients() {
      if let Some(waiting) = self.waiting.take() {
        return self.promote(waiting).await.map(Some);
      }
    }
    Ok(None)
  }

  /// Reload a client so it is controlled by the active generation.
  pub fn reload_client(&mut self, client: ClientId) {
    let controller = self.active_store_id().map(String::from);
    if let Some(slot) = self.clients.get_mut(&client) {
      *slot = controller;
    }
    self.drop_unused_interceptors();
  }

  /// Route a request from `client` through its controlling generation.
  pub async fn dispatch(&self, client: ClientId, request: &Request) -> Result<Handled, FetchError> {
    let interceptor = self
      .controller_of(client)
      .and_then(|id| self.interceptors.get(id));

    match interceptor {
      Some(interceptor) => interceptor.handle(request).await,
      None => Ok(Handled::PassThrough(Bypass::Uncontrolled)),
    }
  }

  /// Resolve a request to a response, performing pass-through fetches directly.
  pub async fn fetch(&self, client: ClientId, request: &Request) -> Result<Response, FetchError> {
    match self.dispatch(client, request).await? {
      Handled::PassThrough(reason) => {
        debug!(url = %request.url, ?reason, "Passing request through to network");
        self.network.fetch(request).await
      }
      Handled::Cache(response) | Handled::Network { response, .. } => Ok(response),
    }
  }

  fn active_has_clients(&self) -> bool {
    let Some(active) = self.active_store_id() else {
      return false;
    };
    self
      .clients
      .values()
      .any(|c| c.as_deref() == Some(active))
  }

  async fn promote(
    &mut self,
    mut controller: GenerationController<S, N>,
  ) -> Result<ActivationReport> {
    let report = controller.activate().await?;
    let store_id = controller.store_id().to_string();

    // A generation still waiting was registered before this one and never activates
    if let Some(mut superseded) = self.waiting.take() {
      debug!(store = superseded.store_id(), "Discarding superseded waiting generation");
      superseded.retire();
    }
    self
      .interceptors
      .insert(store_id.clone(), controller.interceptor()?);

    if controller.claims_clients() {
      for slot in self.clients.values_mut() {
        *slot = Some(store_id.clone());
      }
      debug!(store = %store_id, clients = self.clients.len(), "Claimed clients");
    }

    if let Some(mut previous) = self.active.replace(controller) {
      previous.retire();
    }
    self.drop_unused_interceptors();
    Ok(report)
  }

  fn drop_unused_interceptors(&mut self) {
    let active = self.active_store_id().map(String::from);
    let clients = &self.clients;
    self.interceptors.retain(|id, _| {
      active.as_deref() == Some(id.as_str()) || clients.values().any(|c| c.as_deref() == Some(id.as_str()))
    });
  }
}
