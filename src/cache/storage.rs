//! Cache storage trait with SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::CachedResponse;
use crate::net::{RequestKey, Response};

/// Trait for cache storage backends.
///
/// A backend holds any number of named buckets. Writing into a bucket that
/// does not exist creates it.
pub trait CacheStorage: Send + Sync + 'static {
  /// Names of all existing buckets, sorted.
  fn bucket_names(&self) -> Result<Vec<String>>;

  /// Delete a bucket and all of its entries. Returns whether it existed.
  fn delete_bucket(&self, bucket: &str) -> Result<bool>;

  /// Get the entry stored for an exact request identity.
  fn get_entry(&self, bucket: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Insert or overwrite one entry.
  fn put_entry(&self, bucket: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Insert or overwrite several entries atomically: either all are written or none.
  fn put_entries(&self, bucket: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Number of entries in a bucket (0 if it does not exist).
  fn entry_count(&self, bucket: &str) -> Result<usize>;
}

/// Storage that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStorage {
  buckets: Mutex<BTreeMap<String, HashMap<RequestKey, CachedResponse>>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn bucket_names(&self) -> Result<Vec<String>> {
    let buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(buckets.keys().cloned().collect())
  }

  fn delete_bucket(&self, bucket: &str) -> Result<bool> {
    let mut buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(buckets.remove(bucket).is_some())
  }

  fn get_entry(&self, bucket: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(buckets.get(bucket).and_then(|b| b.get(key)).cloned())
  }

  fn put_entry(&self, bucket: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let mut buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    buckets.entry(bucket.to_string()).or_default().insert(
      key.clone(),
      CachedResponse {
        response: response.clone(),
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn put_entries(&self, bucket: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let target = buckets.entry(bucket.to_string()).or_default();
    let cached_at = Utc::now();
    for (key, response) in entries {
      target.insert(
        key.clone(),
        CachedResponse {
          response: response.clone(),
          cached_at,
        },
      );
    }
    Ok(())
  }

  fn entry_count(&self, bucket: &str) -> Result<usize> {
    let buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(buckets.get(bucket).map_or(0, HashMap::len))
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open or create the cache database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// A private database that disappears with the connection.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("onhouse-cache").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per named bucket
CREATE TABLE IF NOT EXISTS cache_buckets (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by the hash of "METHOD url"
CREATE TABLE IF NOT EXISTS cache_entries (
    bucket TEXT NOT NULL,
    entry_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (bucket, entry_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_bucket ON cache_entries(bucket);
"#;

/// Write one entry (and its bucket row) on an open connection or transaction.
fn insert_entry(conn: &Connection, bucket: &str, key: &RequestKey, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO cache_buckets (name) VALUES (?)",
      params![bucket],
    )
    .map_err(|e| eyre!("Failed to create bucket {}: {}", bucket, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (bucket, entry_hash, method, url, response_url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        bucket,
        key.cache_hash(),
        key.method().as_str(),
        key.url(),
        response.url,
        response.status,
        headers,
        response.body.as_ref(),
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn bucket_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_buckets ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list buckets: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read bucket name: {}", e))?;

    Ok(names)
  }

  fn delete_bucket(&self, bucket: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE bucket = ?", params![bucket])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", bucket, e))?;
    let removed = tx
      .execute("DELETE FROM cache_buckets WHERE name = ?", params![bucket])
      .map_err(|e| eyre!("Failed to delete bucket {}: {}", bucket, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn get_entry(&self, bucket: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT response_url, status, headers, body, cached_at FROM cache_entries
         WHERE bucket = ? AND entry_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, u16, String, Vec<u8>, String)> = stmt
      .query_row(params![bucket, key.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read entry {}: {}", key, e))?;

    match row {
      Some((url, status, headers, body, cached_at_str)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key, e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedResponse {
          response: Response {
            url,
            status,
            headers,
            body: body.into(),
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put_entry(&self, bucket: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    insert_entry(&conn, bucket, key, response)
  }

  fn put_entries(&self, bucket: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_buckets (name) VALUES (?)",
      params![bucket],
    )
    .map_err(|e| eyre!("Failed to create bucket {}: {}", bucket, e))?;

    for (key, response) in entries {
      insert_entry(&tx, bucket, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entry_count(&self, bucket: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE bucket = ?",
        params![bucket],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", bucket, e))?;

    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::testing::url;

  fn key(path: &str) -> RequestKey {
    RequestKey::get(&url(path))
  }

  fn response(path: &str, body: &str) -> Response {
    Response::new(url(path).to_string(), 200, body.to_string())
      .with_header("content-type", "text/html")
  }

  /// Behaviour every backend must share.
  fn exercise_backend(storage: &dyn CacheStorage) {
    assert!(storage.bucket_names().unwrap().is_empty());
    assert!(storage.get_entry("v1", &key("/")).unwrap().is_none());

    storage
      .put_entries(
        "v1",
        &[
          (key("/"), response("/", "home")),
          (key("/index.html"), response("/index.html", "shell")),
        ],
      )
      .unwrap();
    storage
      .put_entry("v2", &key("/"), &response("/", "home v2"))
      .unwrap();

    assert_eq!(storage.bucket_names().unwrap(), vec!["v1", "v2"]);
    assert_eq!(storage.entry_count("v1").unwrap(), 2);
    assert_eq!(storage.entry_count("v2").unwrap(), 1);
    assert_eq!(storage.entry_count("v3").unwrap(), 0);

    let cached = storage.get_entry("v1", &key("/index.html")).unwrap().unwrap();
    assert_eq!(cached.response.text(), "shell");
    assert_eq!(cached.response.status, 200);
    assert_eq!(cached.response.header("content-type"), Some("text/html"));

    // Buckets are isolated namespaces
    let v2 = storage.get_entry("v2", &key("/")).unwrap().unwrap();
    assert_eq!(v2.response.text(), "home v2");
    assert!(storage.get_entry("v2", &key("/index.html")).unwrap().is_none());

    // Last write wins
    storage
      .put_entry("v1", &key("/"), &response("/", "home updated"))
      .unwrap();
    let updated = storage.get_entry("v1", &key("/")).unwrap().unwrap();
    assert_eq!(updated.response.text(), "home updated");
    assert_eq!(storage.entry_count("v1").unwrap(), 2);

    assert!(storage.delete_bucket("v1").unwrap());
    assert!(!storage.delete_bucket("v1").unwrap());
    assert_eq!(storage.bucket_names().unwrap(), vec!["v2"]);
    assert!(storage.get_entry("v1", &key("/")).unwrap().is_none());
  }

  #[test]
  fn test_memory_storage() {
    exercise_backend(&MemoryStorage::new());
  }

  #[test]
  fn test_sqlite_storage() {
    exercise_backend(&SqliteStorage::open_in_memory().unwrap());
  }

  #[test]
  fn test_empty_put_entries_creates_bucket() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put_entries("onhouse-cache-v1", &[]).unwrap();
    assert_eq!(storage.bucket_names().unwrap(), vec!["onhouse-cache-v1"]);

    let memory = MemoryStorage::new();
    memory.put_entries("onhouse-cache-v1", &[]).unwrap();
    assert_eq!(memory.bucket_names().unwrap(), vec!["onhouse-cache-v1"]);
  }

  #[test]
  fn test_sqlite_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage
        .put_entry("v1", &key("/manifest.json"), &response("/manifest.json", "{}"))
        .unwrap();
    }

    let reopened = SqliteStorage::open(&path).unwrap();
    let cached = reopened
      .get_entry("v1", &key("/manifest.json"))
      .unwrap()
      .unwrap();
    assert_eq!(cached.response.text(), "{}");
    assert!(cached.cached_at <= Utc::now());
  }

  #[test]
  fn test_sqlite_binary_body_roundtrip() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let png = vec![0x89u8, b'P', b'N', b'G', 0, 0xff];
    let image = Response::new(url("/nova-logo.png").to_string(), 200, png.clone());

    storage.put_entry("v1", &key("/nova-logo.png"), &image).unwrap();

    let cached = storage.get_entry("v1", &key("/nova-logo.png")).unwrap().unwrap();
    assert_eq!(cached.response.body.as_ref(), png.as_slice());
  }

  #[test]
  fn test_parse_datetime() {
    let dt = parse_datetime("2026-01-15 10:30:00").unwrap();
    assert_eq!(dt.to_rfc3339(), "2026-01-15T10:30:00+00:00");
    assert!(parse_datetime("not a date").is_err());
  }
}
