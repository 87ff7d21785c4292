//! Worker host: dispatches lifecycle and fetch events.
//!
//! Install, activate and settle are handled inline, so an event queued
//! behind them is not dispatched until they finish. Fetch events run as independent
//! tasks and may overlap. Until the first successful activation the worker
//! does not control fetches and proxies them straight to the network.
//! With `skip_waiting` a successful install activates immediately.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{
  CacheStorage, CacheStoreManager, InstallError, InstallPolicy, InstallReport, Served,
};
use crate::event::{EventReceiver, WorkerEvent};
use crate::net::{Network, NetworkError, Request};
use crate::router::RequestRouter;

#[derive(Debug, Error)]
pub enum WorkerError {
  #[error(transparent)]
  Install(#[from] InstallError),

  #[error(transparent)]
  Network(#[from] NetworkError),

  #[error("cannot activate: the last install failed")]
  InstallFailed,

  #[error("cache storage error: {0}")]
  Storage(String),

  #[error("worker host stopped")]
  Stopped,
}

/// Where the worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Started, nothing installed by this host yet
  Parsed,
  Installed,
  /// The last install failed; activation is refused
  Redundant,
  /// Fetches are routed through the cache
  Activated,
}

pub struct WorkerHost<N: Network, S: CacheStorage> {
  router: RequestRouter<N, S>,
  network: Arc<N>,
  assets: Vec<Url>,
  policy: InstallPolicy,
  skip_waiting: bool,
  state: Lifecycle,
}

impl<N: Network, S: CacheStorage> WorkerHost<N, S> {
  pub fn new(network: Arc<N>, cache: CacheStoreManager<S>, assets: Vec<Url>) -> Self {
    Self {
      router: RequestRouter::new(Arc::clone(&network), cache),
      network,
      assets,
      policy: InstallPolicy::default(),
      skip_waiting: false,
      state: Lifecycle::Parsed,
    }
  }

  pub fn with_policy(mut self, policy: InstallPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn with_api_marker(mut self, marker: impl Into<String>) -> Self {
    self.router = self.router.with_api_marker(marker);
    self
  }

  /// Activate as soon as an install succeeds, without waiting for an activate event.
  pub fn with_skip_waiting(mut self, skip_waiting: bool) -> Self {
    self.skip_waiting = skip_waiting;
    self
  }

  /// Handle events until every handle is dropped, then drain background writes.
  pub async fn run(mut self, mut events: EventReceiver) {
    while let Some(event) = events.next().await {
      self.dispatch(event).await;
    }
    self.router.settle().await;
    debug!("Worker host stopped");
  }

  async fn dispatch(&mut self, event: WorkerEvent) {
    match event {
      WorkerEvent::Install { reply } => {
        let result = self.handle_install().await;
        let _ = reply.send(result);
      }
      WorkerEvent::Activate { reply } => {
        let result = self.handle_activate();
        let _ = reply.send(result);
      }
      WorkerEvent::Fetch { request, reply } => {
        self.handle_fetch(request, reply);
      }
      WorkerEvent::Settle { reply } => {
        self.router.settle().await;
        let _ = reply.send(Ok(()));
      }
    }
  }

  async fn handle_install(&mut self) -> Result<InstallReport, WorkerError> {
    let cache = self.router.cache();
    info!(bucket = %cache.version(), assets = self.assets.len(), "Installing");

    match cache
      .initialize(self.network.as_ref(), &self.assets, self.policy)
      .await
    {
      Ok(report) => {
        // Installing a new version never takes control away from an active worker
        if self.state != Lifecycle::Activated {
          self.state = Lifecycle::Installed;
        }
        if self.skip_waiting {
          debug!("Activating right after install");
          self.handle_activate()?;
        }
        Ok(report)
      }
      Err(e) => {
        if self.state != Lifecycle::Activated {
          self.state = Lifecycle::Redundant;
        }
        Err(e.into())
      }
    }
  }

  fn handle_activate(&mut self) -> Result<Vec<String>, WorkerError> {
    if self.state == Lifecycle::Redundant {
      warn!("Refusing to activate after a failed install");
      return Err(WorkerError::InstallFailed);
    }

    let deleted = self
      .router
      .cache()
      .reclaim()
      .map_err(|e| WorkerError::Storage(format!("{:#}", e)))?;

    self.state = Lifecycle::Activated;
    info!(deleted = deleted.len(), "Activated");
    Ok(deleted)
  }

  fn handle_fetch(
    &self,
    request: Request,
    reply: tokio::sync::oneshot::Sender<Result<Served, WorkerError>>,
  ) {
    let controlled = self.state == Lifecycle::Activated;
    let router = self.router.clone();
    let network = Arc::clone(&self.network);

    tokio::spawn(async move {
      let result = if controlled {
        router.route(&request).await
      } else {
        network.fetch(&request).await.map(Served::from_network)
      };
      // The page may have gone away; its answer is simply dropped
      let _ = reply.send(result.map_err(WorkerError::from));
    });
  }
}
