//! Application-facing client that combines the interceptor and the mutation queue.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheStorage, FetchResult};
use crate::http::{Headers, HttpRequest, HttpResponse, Method, Network};
use crate::interceptor::{ControlMessage, FetchInterceptor, MessageOutcome};
use crate::queue::MutationQueue;

/// What happened to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
  /// The server answered
  Sent(HttpResponse),
  /// The network was unreachable; the write was queued under this id
  Queued(String),
}

/// Client with transparent caching for reads and queueing for writes.
///
/// Reads go through the interceptor, so API data falls back to the cache and
/// static assets are served cache-first. Writes that cannot reach the network
/// are put on the mutation queue and replayed on reconnect.
pub struct OfflineClient<S: CacheStorage, N: Network> {
  interceptor: Arc<FetchInterceptor<S, N>>,
  queue: Arc<MutationQueue>,
}

impl<S: CacheStorage, N: Network> Clone for OfflineClient<S, N> {
  fn clone(&self) -> Self {
    Self {
      interceptor: self.interceptor.clone(),
      queue: self.queue.clone(),
    }
  }
}

impl<S: CacheStorage, N: Network> OfflineClient<S, N> {
  pub fn new(interceptor: Arc<FetchInterceptor<S, N>>, queue: Arc<MutationQueue>) -> Self {
    Self { interceptor, queue }
  }

  pub fn interceptor(&self) -> &Arc<FetchInterceptor<S, N>> {
    &self.interceptor
  }

  pub fn queue(&self) -> &Arc<MutationQueue> {
    &self.queue
  }

  /// GET a path with the caching strategy its URL selects.
  pub async fn get(&self, path: &str) -> Result<FetchResult> {
    let url = self.interceptor.settings().resolve(path)?;
    self
      .interceptor
      .fetch(&HttpRequest::get(url))
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", path, e))
  }

  /// Send a request, queueing it for later if it is a write and the network is
  /// unreachable.
  ///
  /// An HTTP error status is a response, not a reason to queue.
  pub async fn send(
    &self,
    method: Method,
    path: &str,
    body: Option<String>,
    headers: Headers,
  ) -> Result<SendOutcome> {
    let url = self.interceptor.settings().resolve(path)?;
    let mut request = HttpRequest::new(method, url).with_headers(headers.clone());
    if let Some(body) = &body {
      request = request.with_body(body.clone());
    }

    match self.interceptor.fetch(&request).await {
      Ok(result) => Ok(SendOutcome::Sent(result.response)),
      Err(e) if method.is_mutation() => {
        debug!("{} {} unreachable ({}), queueing", method, path, e);
        let id = self
          .queue
          .enqueue(path, method, body, headers)
          .inspect_err(|qe| warn!("could not queue {} {}: {}", method, path, qe))
          .map_err(|qe| {
            eyre!(
              "Failed to send {} {}: {} (queueing failed: {})",
              method,
              path,
              e,
              qe
            )
          })?;
        Ok(SendOutcome::Queued(id))
      }
      Err(e) => Err(eyre!("Failed to send {} {}: {}", method, path, e)),
    }
  }

  /// Pre-populate the API cache with data the app already has.
  pub fn seed(&self, path: &str, data: serde_json::Value) -> Result<String> {
    let outcome = self.interceptor.handle_message(ControlMessage::CacheApi {
      url: path.to_string(),
      response: data,
    })?;

    match outcome {
      MessageOutcome::Cached { cache_key } => Ok(cache_key),
      other => Err(eyre!("Unexpected outcome while seeding {}: {:?}", path, other)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStorage};
  use crate::config::QueueConfig;
  use crate::interceptor::{InterceptorSettings, WorkerState};
  use crate::testutil::{memory_store, origin, FakeNetwork};
  use serde_json::json;

  type TestClient = OfflineClient<SqliteStorage, Arc<FakeNetwork>>;

  async fn client(network: &Arc<FakeNetwork>) -> TestClient {
    network.route(Method::Get, "/", HttpResponse::new(200, "<html>"));
    network.route(Method::Get, "/manifest.json", HttpResponse::new(200, "{}"));

    let store = memory_store();
    let settings = InterceptorSettings {
      origin: origin(),
      api_prefix: "/api/".to_string(),
      version: "v1".to_string(),
      precache: vec!["/".to_string(), "/manifest.json".to_string()],
    };
    let interceptor = FetchInterceptor::new(
      Arc::new(SqliteStorage::new(store.clone())),
      network.clone(),
      settings,
    );
    assert_eq!(interceptor.start().await.unwrap(), WorkerState::Activated);
    network.clear_calls();

    let queue = Arc::new(MutationQueue::new(store, QueueConfig::default()));
    OfflineClient::new(Arc::new(interceptor), queue)
  }

  #[tokio::test]
  async fn test_categories_survive_going_offline() {
    let network = FakeNetwork::new();
    let body = br#"[{"id":1,"name":"Fitness"},{"id":2,"name":"Cooking"}]"#.to_vec();
    network.route(
      Method::Get,
      "/api/categories",
      HttpResponse::new(200, body.clone()).with_header("content-type", "application/json"),
    );
    let client = client(&network).await;

    let online = client.get("/api/categories").await.unwrap();
    assert_eq!(online.source, CacheSource::Network);

    network.set_online(false);
    let offline = client.get("/api/categories").await.unwrap();
    assert_eq!(offline.source, CacheSource::Cache);
    assert_eq!(offline.response.body, body);
    assert_eq!(
      offline.response.header("Content-Type"),
      Some("application/json")
    );
    assert!(offline.cached_at.is_some());
  }

  #[tokio::test]
  async fn test_uncached_api_read_offline_is_placeholder() {
    let network = FakeNetwork::new();
    let client = client(&network).await;
    network.set_online(false);

    let result = client.get("/api/skills/7").await.unwrap();
    assert!(result.is_offline_placeholder());
    assert_eq!(result.response.status, 503);
  }

  #[tokio::test]
  async fn test_write_is_queued_when_unreachable() {
    let network = FakeNetwork::new();
    let client = client(&network).await;
    network.set_online(false);

    let outcome = client
      .send(
        Method::Post,
        "/api/achievements",
        Some(r#"{"challengeId":3}"#.to_string()),
        Headers::new(),
      )
      .await
      .unwrap();

    let id = match outcome {
      SendOutcome::Queued(id) => id,
      other => panic!("expected the write to be queued, got {:?}", other),
    };
    let pending = client.queue().pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(pending[0].endpoint, "/api/achievements");
    assert_eq!(pending[0].body.as_deref(), Some(r#"{"challengeId":3}"#));
  }

  #[tokio::test]
  async fn test_error_status_is_not_queued() {
    let network = FakeNetwork::new();
    network.route(
      Method::Post,
      "/api/achievements",
      HttpResponse::new(422, "invalid"),
    );
    let client = client(&network).await;

    let outcome = client
      .send(Method::Post, "/api/achievements", None, Headers::new())
      .await
      .unwrap();

    assert!(matches!(outcome, SendOutcome::Sent(ref r) if r.status == 422));
    assert_eq!(client.queue().size().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_unreachable_read_via_send_is_an_error() {
    let network = FakeNetwork::new();
    let client = client(&network).await;
    network.set_online(false);

    assert!(client
      .send(Method::Head, "/api/categories", None, Headers::new())
      .await
      .is_err());
    assert_eq!(client.queue().size().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_seeded_data_served_offline() {
    let network = FakeNetwork::new();
    let client = client(&network).await;

    let key = client
      .seed("/api/user/progress", json!({ "level": 4, "xp": 1250 }))
      .unwrap();
    assert_eq!(key, "GET https://skills.example.com/api/user/progress");

    network.set_online(false);
    let result = client.get("/api/user/progress").await.unwrap();
    assert_eq!(result.source, CacheSource::Cache);
    let value: serde_json::Value = serde_json::from_slice(&result.response.body).unwrap();
    assert_eq!(value, json!({ "level": 4, "xp": 1250 }));
  }
}
