use bytes::Bytes;
use std::borrow::Cow;

/// A fully materialized HTTP response.
///
/// Cloning is the duplicate step: the clone shares the body buffer, so the
/// page and the cache can each keep a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  /// Final URL after redirects
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Response {
  pub fn new(url: impl Into<String>, status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      url: url.into(),
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  #[cfg(test)]
  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// 2xx status, the only responses worth caching.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header with the given name (case-insensitive).
  #[cfg(test)]
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> Cow<'_, str> {
    String::from_utf8_lossy(&self.body)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_success_range() {
    assert!(Response::new("u", 200, "").is_success());
    assert!(Response::new("u", 204, "").is_success());
    assert!(!Response::new("u", 304, "").is_success());
    assert!(!Response::new("u", 404, "").is_success());
    assert!(!Response::new("u", 500, "").is_success());
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let response = Response::new("u", 200, "").with_header("Content-Type", "text/html");
    assert_eq!(response.header("content-type"), Some("text/html"));
    assert_eq!(response.header("etag"), None);
  }

  #[test]
  fn test_clone_shares_body() {
    let response = Response::new("u", 200, vec![1u8, 2, 3]);
    let duplicate = response.clone();
    assert_eq!(response.body.as_ptr(), duplicate.body.as_ptr());
  }
}
