//! Per-request routing between network and cache.
//!
//! Every intercepted request gets exactly one answer or the network error:
//!
//! - Non-GET requests go straight to the network and never touch the cache.
//! - API traffic (path contains the API marker) is network-first: fetch,
//!   cache the duplicate in the background, fall back to the cache only
//!   when the network fails.
//! - Everything else is cache-first: a hit never touches the network; a
//!   miss is fetched and cached; a failed navigation gets the shell
//!   document.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheStorage, CacheStoreManager, Served};
use crate::net::{Network, NetworkError, Request, RequestKey, Response};

/// Default marker identifying API traffic.
pub const DEFAULT_API_MARKER: &str = "/api/";

/// Which strategy applies to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Non-GET: proxied, never cached
  Passthrough,
  NetworkFirst,
  CacheFirst,
}

pub struct RequestRouter<N: Network, S: CacheStorage> {
  network: Arc<N>,
  cache: CacheStoreManager<S>,
  api_marker: String,
  /// Background cache writes not yet joined
  pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<N: Network, S: CacheStorage> RequestRouter<N, S> {
  pub fn new(network: Arc<N>, cache: CacheStoreManager<S>) -> Self {
    Self {
      network,
      cache,
      api_marker: DEFAULT_API_MARKER.to_string(),
      pending: Arc::new(Mutex::new(Vec::new())),
    }
  }

  /// Set the path fragment that marks API traffic.
  pub fn with_api_marker(mut self, marker: impl Into<String>) -> Self {
    self.api_marker = marker.into();
    self
  }

  pub fn cache(&self) -> &CacheStoreManager<S> {
    &self.cache
  }

  pub fn classify(&self, request: &Request) -> Strategy {
    if !request.is_get() {
      Strategy::Passthrough
    } else if request.url.path().contains(&self.api_marker) {
      Strategy::NetworkFirst
    } else {
      Strategy::CacheFirst
    }
  }

  /// Produce the answer for one intercepted request.
  pub async fn route(&self, request: &Request) -> Result<Served, NetworkError> {
    match self.classify(request) {
      Strategy::Passthrough => {
        debug!(method = %request.method, url = %request.url, "Bypassing cache");
        self.network.fetch(request).await.map(Served::from_network)
      }
      Strategy::NetworkFirst => self.network_first(request).await,
      Strategy::CacheFirst => self.cache_first(request).await,
    }
  }

  async fn network_first(&self, request: &Request) -> Result<Served, NetworkError> {
    let key = request.key();

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store_in_background(key, &response);
        Ok(Served::from_network(response))
      }
      Err(err) => match self.cache.lookup(&key) {
        Some(cached) => {
          info!(key = %key, error = %err, "Network failed, serving cached response");
          Ok(Served::offline(cached))
        }
        None => {
          warn!(key = %key, error = %err, "Network failed and nothing cached");
          Err(err)
        }
      },
    }
  }

  async fn cache_first(&self, request: &Request) -> Result<Served, NetworkError> {
    let key = request.key();

    if let Some(cached) = self.cache.lookup(&key) {
      debug!(key = %key, "Cache hit");
      return Ok(Served::from_cache(cached));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store_in_background(key, &response);
        Ok(Served::from_network(response))
      }
      Err(err) => {
        if request.is_navigation() {
          if let Some(shell) = self.cache.shell() {
            info!(key = %key, error = %err, "Network failed, serving shell document");
            return Ok(Served::shell(shell));
          }
        }
        warn!(key = %key, error = %err, "Network failed and nothing cached");
        Err(err)
      }
    }
  }

  /// Write a duplicate of a successful response without delaying the caller.
  fn store_in_background(&self, key: RequestKey, response: &Response) {
    if !response.is_success() {
      debug!(key = %key, status = response.status, "Not caching response");
      return;
    }

    let cache = self.cache.clone();
    let duplicate = response.clone();
    let handle = tokio::task::spawn_blocking(move || {
      cache.store(&key, &duplicate);
    });

    let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
    pending.retain(|h| !h.is_finished());
    pending.push(handle);
  }

  /// Wait for every background cache write started so far.
  pub async fn settle(&self) {
    let pending: Vec<JoinHandle<()>> = {
      let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
      std::mem::take(&mut *guard)
    };

    for handle in pending {
      if let Err(e) = handle.await {
        warn!(error = %e, "Background cache write failed");
      }
    }
  }
}

impl<N: Network, S: CacheStorage> Clone for RequestRouter<N, S> {
  fn clone(&self) -> Self {
    Self {
      network: Arc::clone(&self.network),
      cache: self.cache.clone(),
      api_marker: self.api_marker.clone(),
      pending: Arc::clone(&self.pending),
    }
  }
}
