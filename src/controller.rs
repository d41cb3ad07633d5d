//! Generation lifecycle: install, wait, activate, serve, retire.

use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheStorage, Store, StoreManager};
use crate::config::GenerationConfig;
use crate::error::{CacheError, Result};
use crate::interceptor::RequestInterceptor;
use crate::network::Network;

/// Lifecycle state of one generation. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
  Installing,
  /// Installed and seeded, not yet in control
  Waiting,
  Activating,
  /// Handling requests for its clients
  Active,
  /// Failed to install or superseded by a newer generation
  Redundant,
}

impl GenerationState {
  pub fn as_str(&self) -> &'static str {
    match self {
      GenerationState::Installing => "installing",
      GenerationState::Waiting => "waiting",
      GenerationState::Activating => "activating",
      GenerationState::Active => "active",
      GenerationState::Redundant => "redundant",
    }
  }
}

impl fmt::Display for GenerationState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Result of a successful install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOutcome {
  /// Activate now instead of waiting for every old client to close
  pub skip_waiting: bool,
}

/// What activation removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
  pub deleted: Vec<String>,
  /// Stores whose deletion failed, with the error message
  pub failed: Vec<(String, String)>,
}

/// Drives one generation of the caching logic through its lifecycle.
pub struct GenerationController<S: CacheStorage, N: Network> {
  config: GenerationConfig,
  store_id: String,
  manager: StoreManager<S>,
  network: Arc<N>,
  state: GenerationState,
  store: Option<Store<S>>,
}

impl<S: CacheStorage + 'static, N: Network> GenerationController<S, N> {
  pub fn new(config: GenerationConfig, manager: StoreManager<S>, network: Arc<N>) -> Self {
    Self {
      store_id: config.store_id.to_string(),
      config,
      manager,
      network,
      state: GenerationState::Installing,
      store: None,
    }
  }

  /// Rebuild an already-active generation from its persisted store.
  ///
  /// Used when the host restarts: the store survived, so neither install nor
  /// activation runs again.
  pub async fn restore(
    config: GenerationConfig,
    manager: StoreManager<S>,
    network: Arc<N>,
  ) -> Result<Self> {
    let mut controller = Self::new(config, manager, network);
    let store = controller
      .manager
      .existing(&controller.store_id)
      .await?
      .ok_or_else(|| CacheError::UnknownStore(controller.store_id.clone()))?;

    debug!(store = store.id(), "Restored active generation");
    controller.store = Some(store);
    controller.state = GenerationState::Active;
    Ok(controller)
  }

  pub fn state(&self) -> GenerationState {
    self.state
  }

  pub fn store_id(&self) -> &str {
    &self.store_id
  }

  pub fn config(&self) -> &GenerationConfig {
    &self.config
  }

  /// Whether activation takes over clients that loaded under an older generation.
  pub fn claims_clients(&self) -> bool {
    self.config.claim_clients
  }

  /// Open the current store and seed it with the manifest.
  ///
  /// On failure the generation becomes redundant and must never activate;
  /// whatever generation was active before stays in control.
  pub async fn install(&mut self) -> Result<InstallOutcome> {
    self.expect_state(GenerationState::Installing, "install")?;
    info!(store = %self.store_id, "Installing");

    match self.open_and_seed().await {
      Ok(store) => {
        self.store = Some(store);
        self.state = GenerationState::Waiting;
        info!(store = %self.store_id, "Installed");
        Ok(InstallOutcome {
          skip_waiting: self.config.skip_waiting,
        })
      }
      Err(e) => {
        warn!(store = %self.store_id, error = %e, "Install failed");
        self.state = GenerationState::Redundant;
        Err(e)
      }
    }
  }

  async fn open_and_seed(&self) -> Result<Store<S>> {
    let store = self.manager.open(&self.store_id).await?;
    info!(store = %self.store_id, "Caching app shell");
    self
      .manager
      .seed(
        &store,
        &self.config.manifest,
        &self.config.origin,
        self.network.as_ref(),
      )
      .await?;
    Ok(store)
  }

  /// Delete every store other than this generation's, then take control.
  ///
  /// Deletions run concurrently and all of them settle before this returns.
  /// A failed deletion is logged and reported but does not stop activation.
  pub async fn activate(&mut self) -> Result<ActivationReport> {
    self.expect_state(GenerationState::Waiting, "activate")?;
    self.state = GenerationState::Activating;
    info!(store = %self.store_id, "Activating");

    let stale: Vec<String> = match self.manager.list_store_ids().await {
      Ok(ids) => ids.into_iter().filter(|id| *id != self.store_id).collect(),
      Err(e) => {
        warn!(error = %e, "Could not list stores, skipping cleanup");
        Vec::new()
      }
    };

    let manager = &self.manager;
    let results = join_all(stale.into_iter().map(|id| async move {
      info!(store = %id, "Clearing old cache");
      let result = manager.delete(&id).await;
      (id, result)
    }))
    .await;

    let mut report = ActivationReport::default();
    for (id, result) in results {
      match result {
        Ok(_) => report.deleted.push(id),
        Err(e) => {
          warn!(store = %id, error = %e, "Failed to delete old cache");
          report.failed.push((id, e.to_string()));
        }
      }
    }

    self.state = GenerationState::Active;
    info!(
      store = %self.store_id,
      deleted = report.deleted.len(),
      failed = report.failed.len(),
      "Active"
    );
    Ok(report)
  }

  /// Mark this generation as superseded.
  pub fn retire(&mut self) {
    if self.state != GenerationState::Redundant {
      debug!(store = %self.store_id, from = %self.state, "Retiring generation");
      self.state = GenerationState::Redundant;
    }
  }

  /// Request handler for this generation. Only available while active.
  pub fn interceptor(&self) -> Result<RequestInterceptor<S, N>> {
    self.expect_state(GenerationState::Active, "handle requests")?;
    let store = self
      .store
      .clone()
      .ok_or_else(|| CacheError::UnknownStore(self.store_id.clone()))?;
    Ok(RequestInterceptor::new(
      store,
      Arc::clone(&self.network),
      self.config.exclude.clone(),
    ))
  }

  fn expect_state(&self, expected: GenerationState, operation: &'static str) -> Result<()> {
    if self.state == expected {
      Ok(())
    } else {
      Err(CacheError::InvalidTransition {
        store: self.store_id.clone(),
        state: self.state.as_str(),
        operation,
      })
    }
  }
}
