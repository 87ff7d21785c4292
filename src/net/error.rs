use thiserror::Error;

/// Failure to obtain a response from the network.
///
/// HTTP error statuses are not network failures; a 404 or 500 still
/// arrives as a `Response`.
#[derive(Debug, Error)]
pub enum NetworkError {
  #[error("request to {url} timed out")]
  Timeout { url: String },

  #[error("could not connect to {url}: {reason}")]
  Connect { url: String, reason: String },

  #[error("request to {url} failed: {reason}")]
  Request { url: String, reason: String },

  #[error("failed to read response body from {url}: {reason}")]
  Body { url: String, reason: String },
}

impl NetworkError {
  pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
    let url = url.to_string();
    if err.is_timeout() {
      Self::Timeout { url }
    } else if err.is_connect() {
      Self::Connect {
        url,
        reason: err.to_string(),
      }
    } else {
      Self::Request {
        url,
        reason: err.to_string(),
      }
    }
  }

  /// The response started but its body could not be read to the end.
  pub fn from_body(url: &str, err: reqwest::Error) -> Self {
    let url = url.to_string();
    if err.is_timeout() {
      Self::Timeout { url }
    } else {
      Self::Body {
        url,
        reason: err.to_string(),
      }
    }
  }
}
