//! Storage that rejects every operation, for exercising degraded paths.

use color_eyre::{eyre::eyre, Result};

use super::storage::CacheStorage;
use super::traits::CachedResponse;
use crate::net::{RequestKey, Response};

#[derive(Default)]
pub struct FailingStorage;

impl CacheStorage for FailingStorage {
  fn bucket_names(&self) -> Result<Vec<String>> {
    Err(eyre!("disk I/O error"))
  }

  fn delete_bucket(&self, _bucket: &str) -> Result<bool> {
    Err(eyre!("disk I/O error"))
  }

  fn get_entry(&self, _bucket: &str, _key: &RequestKey) -> Result<Option<CachedResponse>> {
    Err(eyre!("disk I/O error"))
  }

  fn put_entry(&self, _bucket: &str, _key: &RequestKey, _response: &Response) -> Result<()> {
    Err(eyre!("quota exceeded"))
  }

  fn put_entries(&self, _bucket: &str, _entries: &[(RequestKey, Response)]) -> Result<()> {
    Err(eyre!("quota exceeded"))
  }

  fn entry_count(&self, _bucket: &str) -> Result<usize> {
    Err(eyre!("disk I/O error"))
  }
}
