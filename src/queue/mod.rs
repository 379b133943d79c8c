//! Persisted mutation queue.
//!
//! Writes that could not reach the server are stored as a JSON array in the
//! store and replayed oldest first once connectivity returns. Delivery is
//! at-least-once: each replayed request carries its queue id in an idempotency
//! header so the server can drop duplicates.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{QueueConfig, RetryPolicy};
use crate::http::{Headers, HttpRequest, Method, Network, TransportError};
use crate::store::Store;

/// Default upper bound on queued requests.
pub const MAX_QUEUE_SIZE: usize = 100;

/// Default number of failed replays before a request is dropped.
pub const MAX_RETRIES: u32 = 3;

/// Key under which the queue is stored.
const QUEUE_KEY: &str = "offline_queue";

/// A write waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
  pub id: String,
  /// Path (or absolute URL) relative to the API base URL
  pub endpoint: String,
  pub method: Method,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
  #[serde(default)]
  pub headers: Headers,
  pub enqueued_at: DateTime<Utc>,
  #[serde(default)]
  pub retry_count: u32,
}

/// Outcome counts of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncResult {
  pub succeeded: usize,
  pub failed: usize,
}

/// Why a replayed request did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
  #[error(transparent)]
  Transport(#[from] TransportError),
  #[error("server responded with HTTP {0}")]
  Status(u16),
  #[error("invalid endpoint '{0}'")]
  InvalidEndpoint(String),
}

impl ReplayError {
  /// Whether another replay pass could succeed under the given policy.
  pub fn is_retryable(&self, policy: RetryPolicy) -> bool {
    match (self, policy) {
      (Self::InvalidEndpoint(_), _) => false,
      (_, RetryPolicy::All) => true,
      (Self::Transport(_), RetryPolicy::Transient) => true,
      (Self::Status(code), RetryPolicy::Transient) => {
        *code == 408 || *code == 429 || *code >= 500
      }
    }
  }
}

/// What a pass decided for one request.
enum Verdict {
  Done,
  Retry(u32),
}

pub struct MutationQueue {
  store: Arc<Store>,
  config: QueueConfig,
  seq: AtomicU64,
}

impl MutationQueue {
  pub fn new(store: Arc<Store>, config: QueueConfig) -> Self {
    Self {
      store,
      config,
      seq: AtomicU64::new(0),
    }
  }

  pub fn config(&self) -> &QueueConfig {
    &self.config
  }

  /// Append a write. Evicts the oldest entries beyond `max_size`.
  pub fn enqueue(
    &self,
    endpoint: &str,
    method: Method,
    body: Option<String>,
    headers: Headers,
  ) -> Result<String> {
    if !method.is_mutation() {
      return Err(eyre!("Only mutating requests can be queued, got {}", method));
    }

    let enqueued_at = Utc::now();
    let id = self.next_id(endpoint, method, enqueued_at);
    let request = QueuedRequest {
      id: id.clone(),
      endpoint: endpoint.to_string(),
      method,
      body,
      headers,
      enqueued_at,
      retry_count: 0,
    };

    let max_size = self.config.max_size.max(1);
    let (evicted, size) = self.store.update_value(QUEUE_KEY, |current| {
      let mut queue = parse_queue(current.as_deref())?;
      queue.push(request);

      let overflow = queue.len().saturating_sub(max_size);
      let evicted: Vec<String> = queue.drain(..overflow).map(|r| r.id).collect();

      Ok((serialize_queue(&queue)?, (evicted, queue.len())))
    })?;

    if !evicted.is_empty() {
      warn!(
        "offline queue full, evicted {} oldest request(s): {}",
        evicted.len(),
        evicted.join(", ")
      );
    }
    info!("queued {} {} as {} ({} pending)", method, endpoint, id, size);

    Ok(id)
  }

  /// Remove one entry. Returns whether it was present.
  pub fn dequeue(&self, request_id: &str) -> Result<bool> {
    self.store.update_value(QUEUE_KEY, |current| {
      let mut queue = parse_queue(current.as_deref())?;
      let before = queue.len();
      queue.retain(|r| r.id != request_id);
      let removed = queue.len() != before;
      Ok((serialize_queue(&queue)?, removed))
    })
  }

  /// Snapshot of the queue, oldest first.
  pub fn pending(&self) -> Result<Vec<QueuedRequest>> {
    parse_queue(self.store.get_value(QUEUE_KEY)?.as_deref())
  }

  pub fn size(&self) -> Result<usize> {
    Ok(self.pending()?.len())
  }

  pub fn clear(&self) -> Result<()> {
    self.store.set_value(QUEUE_KEY, "[]")
  }

  /// Replay every queued request against the network, oldest first, one at a time.
  ///
  /// Never fails: per-request failures end up in the returned counts. The queue is
  /// rewritten once at the end, so an abandoned pass leaves it untouched. Requests
  /// enqueued while the pass runs are kept.
  pub async fn drain_and_replay<N, FS, FE>(
    &self,
    base_url: &Url,
    network: &N,
    mut on_success: FS,
    mut on_error: FE,
  ) -> SyncResult
  where
    N: Network + ?Sized,
    FS: FnMut(&QueuedRequest),
    FE: FnMut(&QueuedRequest, &ReplayError),
  {
    let snapshot = match self.pending() {
      Ok(queue) => queue,
      Err(e) => {
        warn!("could not read offline queue: {}", e);
        return SyncResult::default();
      }
    };

    if snapshot.is_empty() {
      return SyncResult::default();
    }
    info!("replaying {} queued request(s)", snapshot.len());

    let mut result = SyncResult::default();
    let mut verdicts: HashMap<String, Verdict> = HashMap::new();

    for request in &snapshot {
      match self.replay_one(base_url, network, request).await {
        Ok(()) => {
          debug!("replayed {} {} ({})", request.method, request.endpoint, request.id);
          result.succeeded += 1;
          verdicts.insert(request.id.clone(), Verdict::Done);
          on_success(request);
        }
        Err(e) => {
          let retry_count = request.retry_count + 1;
          if e.is_retryable(self.config.retry_policy) && retry_count <= self.config.max_retries {
            debug!(
              "replay of {} failed ({}), attempt {}/{}",
              request.id, e, retry_count, self.config.max_retries
            );
            verdicts.insert(request.id.clone(), Verdict::Retry(retry_count));
          } else {
            warn!(
              "dropping {} {} ({}) after {} attempt(s): {}",
              request.method, request.endpoint, request.id, retry_count, e
            );
            result.failed += 1;
            verdicts.insert(request.id.clone(), Verdict::Done);
          }
          on_error(request, &e);
        }
      }
    }

    if let Err(e) = self.commit_pass(&verdicts) {
      warn!("could not rewrite offline queue after replay: {}", e);
    }

    info!(
      "replay finished: {} succeeded, {} failed",
      result.succeeded, result.failed
    );
    result
  }

  async fn replay_one<N: Network + ?Sized>(
    &self,
    base_url: &Url,
    network: &N,
    request: &QueuedRequest,
  ) -> std::result::Result<(), ReplayError> {
    let url = base_url
      .join(&request.endpoint)
      .map_err(|_| ReplayError::InvalidEndpoint(request.endpoint.clone()))?;

    let mut http = HttpRequest::new(request.method, url).with_headers(request.headers.clone());
    if let Some(body) = &request.body {
      http = http.with_body(body.clone());
    }
    if let Some(header) = &self.config.idempotency_header {
      http = http.with_header(header.clone(), request.id.clone());
    }

    let response = network.fetch(&http).await?;
    if response.is_ok() {
      Ok(())
    } else {
      Err(ReplayError::Status(response.status))
    }
  }

  /// Apply a pass's verdicts to the current queue in one write.
  fn commit_pass(&self, verdicts: &HashMap<String, Verdict>) -> Result<()> {
    self.store.update_value(QUEUE_KEY, |current| {
      let queue: Vec<QueuedRequest> = parse_queue(current.as_deref())?
        .into_iter()
        .filter_map(|mut r| match verdicts.get(&r.id) {
          Some(Verdict::Done) => None,
          Some(Verdict::Retry(count)) => {
            r.retry_count = *count;
            Some(r)
          }
          None => Some(r),
        })
        .collect();

      Ok((serialize_queue(&queue)?, ()))
    })
  }

  /// Opaque id derived from the enqueue time, a sequence number and the request.
  fn next_id(&self, endpoint: &str, method: Method, at: DateTime<Utc>) -> String {
    let seq = self.seq.fetch_add(1, Ordering::SeqCst);

    let mut hasher = Sha256::new();
    hasher.update(at.timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
    hasher.update(seq.to_be_bytes());
    hasher.update(std::process::id().to_be_bytes());
    hasher.update(method.as_str().as_bytes());
    hasher.update(endpoint.as_bytes());
    let digest = hasher.finalize();

    hex::encode(&digest[..12])
  }
}

fn parse_queue(raw: Option<&str>) -> Result<Vec<QueuedRequest>> {
  match raw {
    None => Ok(Vec::new()),
    Some(raw) => {
      serde_json::from_str(raw).map_err(|e| eyre!("Failed to parse offline queue: {}", e))
    }
  }
}

fn serialize_queue(queue: &[QueuedRequest]) -> Result<String> {
  serde_json::to_string(queue).map_err(|e| eyre!("Failed to serialize offline queue: {}", e))
}
