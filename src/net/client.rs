use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::error::NetworkError;
use super::request::Request;
use super::response::Response;

/// Something that can carry a request to the origin.
pub trait Network: Send + Sync + 'static {
  /// Perform a single network attempt. The returned response is fully read.
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response, NetworkError>> + Send;
}

/// Network collaborator backed by reqwest.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("onhouse-cache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let url = request.url.to_string();

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| NetworkError::from_reqwest(&url, e))?;

    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    // Read the whole body now; the snapshot is what gets shared.
    let body = response
      .bytes()
      .await
      .map_err(|e| NetworkError::from_body(&url, e))?;

    debug!(method = %request.method, url = %url, status, bytes = body.len(), "Fetched");

    Ok(Response {
      url: final_url,
      status,
      headers,
      body,
    })
  }
}
