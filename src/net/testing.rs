//! Scripted network for exercising the cache without sockets.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use url::Url;

use super::{Network, NetworkError, Request, RequestKey, Response};

pub const ORIGIN: &str = "http://onhouse.test/";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Answers from a fixed route table; unknown URLs get a 404.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, (u16, Bytes)>>,
  offline: AtomicBool,
  calls: Mutex<Vec<RequestKey>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_route(self, path: &str, status: u16, body: &str) -> Self {
    self.set_route(path, status, body);
    self
  }

  pub fn set_route(&self, path: &str, status: u16, body: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url(path).to_string(), (status, Bytes::from(body.to_string())));
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<RequestKey> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, path: &str) -> usize {
    let target = url(path).to_string();
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|k| k.url() == target)
      .count()
  }
}

impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    self.calls.lock().unwrap().push(request.key());

    let url = request.url.to_string();
    if self.offline.load(Ordering::SeqCst) {
      return Err(NetworkError::Connect {
        url,
        reason: "network unreachable".to_string(),
      });
    }

    let route = self.routes.lock().unwrap().get(&url).cloned();
    Ok(match route {
      Some((status, body)) => Response::new(url, status, body),
      None => Response::new(url, 404, Bytes::new()),
    })
  }
}
