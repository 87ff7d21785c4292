//! Lifecycle owner of the current cache bucket.

use color_eyre::Result;
use futures::future::join_all;
use reqwest::Method;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::storage::CacheStorage;
use super::traits::CachedResponse;
use crate::net::{Network, NetworkError, Request, RequestKey, Response};

/// What to do when some manifest asset cannot be fetched at install time.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InstallPolicy {
  /// Any failure aborts the install and nothing is written
  #[default]
  AllOrNothing,
  /// Failures are skipped; everything that was fetched is written
  BestEffort,
}

/// Why the manifest could not be cached.
#[derive(Debug, Error)]
pub enum InstallError {
  #[error("failed to fetch manifest asset {url}: {source}")]
  Fetch {
    url: String,
    #[source]
    source: NetworkError,
  },

  #[error("manifest asset {url} returned HTTP {status}")]
  Status { url: String, status: u16 },

  #[error("failed to write manifest assets to bucket {bucket}: {reason}")]
  Storage { bucket: String, reason: String },
}

/// Outcome of a successful install.
#[derive(Debug, Default)]
pub struct InstallReport {
  /// Identities written to the bucket, in manifest order
  pub stored: Vec<RequestKey>,
  /// Assets left out under the best-effort policy, with the reason
  pub skipped: Vec<(RequestKey, String)>,
}

/// One bucket as seen by `bucket_summaries`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSummary {
  pub name: String,
  pub current: bool,
  pub entries: usize,
}

/// Owns the current cache bucket.
///
/// `initialize` runs on install, `reclaim` on activate; `lookup` and
/// `store` serve the router in between. Storage errors on the request path
/// are logged and degrade to a miss or a skipped write.
pub struct CacheStoreManager<S: CacheStorage> {
  storage: Arc<S>,
  version: String,
  shell: Option<RequestKey>,
}

impl<S: CacheStorage> CacheStoreManager<S> {
  pub fn new(storage: S, version: impl Into<String>) -> Self {
    Self::from_shared(Arc::new(storage), version)
  }

  pub fn from_shared(storage: Arc<S>, version: impl Into<String>) -> Self {
    Self {
      storage,
      version: version.into(),
      shell: None,
    }
  }

  /// Set the document served to navigations that cannot reach the network.
  pub fn with_shell(mut self, shell: &Url) -> Self {
    self.shell = Some(RequestKey::get(shell));
    self
  }

  /// Tag of the current bucket.
  pub fn version(&self) -> &str {
    &self.version
  }

  /// Populate the current bucket with every manifest asset, fetched fresh.
  pub async fn initialize<N: Network>(
    &self,
    network: &N,
    assets: &[Url],
    policy: InstallPolicy,
  ) -> Result<InstallReport, InstallError> {
    let fetches = assets.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let result = network.fetch(&request).await;
      (request.key(), result)
    });
    let results = join_all(fetches).await;

    let mut report = InstallReport::default();
    let mut entries: Vec<(RequestKey, Response)> = Vec::with_capacity(results.len());

    for (key, result) in results {
      let failure = match result {
        Ok(response) if response.is_success() => {
          entries.push((key, response));
          continue;
        }
        Ok(response) => InstallError::Status {
          url: key.url().to_string(),
          status: response.status,
        },
        Err(source) => InstallError::Fetch {
          url: key.url().to_string(),
          source,
        },
      };

      match policy {
        InstallPolicy::AllOrNothing => {
          warn!(bucket = %self.version, error = %failure, "Install aborted");
          return Err(failure);
        }
        InstallPolicy::BestEffort => {
          warn!(bucket = %self.version, error = %failure, "Skipping manifest asset");
          report.skipped.push((key, failure.to_string()));
        }
      }
    }

    self
      .storage
      .put_entries(&self.version, &entries)
      .map_err(|e| InstallError::Storage {
        bucket: self.version.clone(),
        reason: format!("{:#}", e),
      })?;

    report.stored = entries.into_iter().map(|(key, _)| key).collect();
    info!(
      bucket = %self.version,
      stored = report.stored.len(),
      skipped = report.skipped.len(),
      "Populated cache bucket"
    );

    Ok(report)
  }

  /// Delete every bucket other than the current one. Returns the deleted names.
  pub fn reclaim(&self) -> Result<Vec<String>> {
    let stale: Vec<String> = self
      .storage
      .bucket_names()?
      .into_iter()
      .filter(|name| name != &self.version)
      .collect();

    for name in &stale {
      self.storage.delete_bucket(name)?;
      info!(bucket = %name, "Deleted stale cache bucket");
    }

    Ok(stale)
  }

  /// Exact-match lookup in the current bucket.
  pub fn lookup(&self, key: &RequestKey) -> Option<CachedResponse> {
    match self.storage.get_entry(&self.version, key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key = %key, error = %e, "Cache lookup failed, treating as miss");
        None
      }
    }
  }

  /// Store a response under its request identity. Returns whether it was written.
  ///
  /// Only successful GET responses are kept.
  pub fn store(&self, key: &RequestKey, response: &Response) -> bool {
    if key.method() != Method::GET || !response.is_success() {
      debug!(key = %key, status = response.status, "Not caching response");
      return false;
    }

    match self.storage.put_entry(&self.version, key, response) {
      Ok(()) => {
        debug!(key = %key, bucket = %self.version, "Cached response");
        true
      }
      Err(e) => {
        warn!(key = %key, error = %e, "Cache write failed, skipping");
        false
      }
    }
  }

  /// The cached shell document, if one is configured and present.
  pub fn shell(&self) -> Option<CachedResponse> {
    self.shell.as_ref().and_then(|key| self.lookup(key))
  }

  /// Every bucket in storage with its entry count.
  pub fn bucket_summaries(&self) -> Result<Vec<BucketSummary>> {
    self
      .storage
      .bucket_names()?
      .into_iter()
      .map(|name| {
        let entries = self.storage.entry_count(&name)?;
        Ok(BucketSummary {
          current: name == self.version,
          name,
          entries,
        })
      })
      .collect()
  }
}

impl<S: CacheStorage> Clone for CacheStoreManager<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      version: self.version.clone(),
      shell: self.shell.clone(),
    }
  }
}
