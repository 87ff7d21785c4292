//! Core types shared by the cache store and the router.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::net::Response;

/// A stored response together with the time it was written.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// The single answer produced for an intercepted request.
#[derive(Debug, Clone)]
pub struct Served {
  /// The response handed back to the page
  pub response: Response,
  /// Where it came from
  pub source: CacheSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  /// A live response straight from the network.
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// A cache hit that never touched the network.
  pub fn from_cache(cached: CachedResponse) -> Self {
    Self::with_source(cached, CacheSource::Cache)
  }

  /// A cache entry used because the network failed.
  pub fn offline(cached: CachedResponse) -> Self {
    Self::with_source(cached, CacheSource::Offline)
  }

  /// The shell document served in place of an unreachable page.
  pub fn shell(cached: CachedResponse) -> Self {
    Self::with_source(cached, CacheSource::Shell)
  }

  fn with_source(cached: CachedResponse, source: CacheSource) -> Self {
    Self {
      response: cached.response,
      source,
      cached_at: Some(cached.cached_at),
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Cache hit, network not consulted
  Cache,
  /// Network failed, serving the cached entry
  Offline,
  /// Network failed on a navigation, serving the shell document
  Shell,
}

impl fmt::Display for CacheSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "offline",
      Self::Shell => "shell",
    };
    f.write_str(name)
  }
}
