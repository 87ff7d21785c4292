use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// What the page expects back from a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  /// Page navigation expecting a full HTML document
  Document,
  /// Anything else (scripts, images, API calls, ...)
  #[default]
  Asset,
}

/// A request intercepted from the page.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Option<Bytes>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      destination: Destination::Asset,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A top-level page navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      ..Self::get(url)
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }

  pub fn is_navigation(&self) -> bool {
    self.destination == Destination::Document
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(self.method.clone(), &self.url)
  }
}

/// Identity of a cache entry: method plus absolute URL.
///
/// The fragment is dropped since it never reaches the network. Matching is
/// exact; there is no prefix or query-insensitive lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: Method,
  url: String,
}

impl RequestKey {
  pub fn new(method: Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method,
      url: url.into(),
    }
  }

  pub fn get(url: &Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// Stable, fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// Resolve a manifest entry or command-line URL against the origin.
///
/// Absolute URLs are returned unchanged.
pub fn resolve(origin: &Url, raw: &str) -> Result<Url> {
  origin
    .join(raw.trim())
    .map_err(|e| eyre!("Invalid URL '{}': {}", raw, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin() -> Url {
    Url::parse("http://onhouse.test/").unwrap()
  }

  #[test]
  fn test_resolve_relative_manifest_entries() {
    let origin = origin();
    assert_eq!(resolve(&origin, "./").unwrap().as_str(), "http://onhouse.test/");
    assert_eq!(
      resolve(&origin, "./index.html").unwrap().as_str(),
      "http://onhouse.test/index.html"
    );
    assert_eq!(
      resolve(&origin, "/manifest.json").unwrap().as_str(),
      "http://onhouse.test/manifest.json"
    );
  }

  #[test]
  fn test_resolve_keeps_absolute_urls() {
    let url = resolve(&origin(), "https://cdn.example.com/logo.png").unwrap();
    assert_eq!(url.as_str(), "https://cdn.example.com/logo.png");
  }

  #[test]
  fn test_resolve_under_subpath() {
    let origin = Url::parse("http://onhouse.test/app/").unwrap();
    assert_eq!(
      resolve(&origin, "./index.html").unwrap().as_str(),
      "http://onhouse.test/app/index.html"
    );
  }

  #[test]
  fn test_key_ignores_fragment() {
    let with_fragment = Url::parse("http://onhouse.test/index.html#avisos").unwrap();
    let without = Url::parse("http://onhouse.test/index.html").unwrap();
    assert_eq!(RequestKey::get(&with_fragment), RequestKey::get(&without));
  }

  #[test]
  fn test_key_distinguishes_method_and_query() {
    let url = Url::parse("http://onhouse.test/api/announcements").unwrap();
    let query = Url::parse("http://onhouse.test/api/announcements?page=2").unwrap();

    assert_ne!(RequestKey::get(&url), RequestKey::new(Method::POST, &url));
    assert_ne!(RequestKey::get(&url), RequestKey::get(&query));
    assert_ne!(
      RequestKey::get(&url).cache_hash(),
      RequestKey::get(&query).cache_hash()
    );
  }

  #[test]
  fn test_cache_hash_is_stable_hex() {
    let url = Url::parse("http://onhouse.test/").unwrap();
    let hash = RequestKey::get(&url).cache_hash();
    assert_eq!(hash.len(), 64);
    assert_eq!(hash, RequestKey::get(&url).cache_hash());
  }

  #[test]
  fn test_navigation_request() {
    let request = Request::navigate(origin());
    assert!(request.is_get());
    assert!(request.is_navigation());
    assert!(!Request::get(origin()).is_navigation());
  }
}
