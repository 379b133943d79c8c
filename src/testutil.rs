//! Shared test helpers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::http::{HttpRequest, HttpResponse, Method, Network, TransportError};
use crate::store::Store;

pub const ORIGIN: &str = "https://skills.example.com";

pub fn origin() -> Url {
  Url::parse(ORIGIN).unwrap()
}

pub fn url(path: &str) -> Url {
  origin().join(path).unwrap()
}

pub fn memory_store() -> Arc<Store> {
  Arc::new(Store::open_in_memory().unwrap())
}

/// Scripted network: answers from a route table, fails with a connect error while
/// offline, and records every request it sees.
pub struct FakeNetwork {
  online: AtomicBool,
  routes: Mutex<HashMap<(Method, String), HttpResponse>>,
  requests: Mutex<Vec<HttpRequest>>,
}

impl FakeNetwork {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      online: AtomicBool::new(true),
      routes: Mutex::new(HashMap::new()),
      requests: Mutex::new(Vec::new()),
    })
  }

  pub fn route(&self, method: Method, path: &str, response: HttpResponse) {
    self
      .routes
      .lock()
      .unwrap()
      .insert((method, path.to_string()), response);
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// Every request seen so far, as "METHOD /path".
  pub fn calls(&self) -> Vec<String> {
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .map(|r| format!("{} {}", r.method, r.url.path()))
      .collect()
  }

  pub fn requests(&self) -> Vec<HttpRequest> {
    self.requests.lock().unwrap().clone()
  }

  pub fn clear_calls(&self) {
    self.requests.lock().unwrap().clear();
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
    self.requests.lock().unwrap().push(request.clone());

    if !self.online.load(Ordering::SeqCst) {
      return Err(TransportError::Connect("network unreachable".to_string()));
    }

    let routes = self.routes.lock().unwrap();
    Ok(
      routes
        .get(&(request.method, request.url.path().to_string()))
        .cloned()
        .unwrap_or_else(|| HttpResponse::new(404, "not found")),
    )
  }
}
