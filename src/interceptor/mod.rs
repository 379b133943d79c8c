//! Fetch interceptor: picks a caching strategy per request.
//!
//! - Non-GET requests go straight to the network.
//! - GETs under the API prefix are network-first with cache fallback, degrading to
//!   a synthesized 503 JSON body when offline with nothing cached.
//! - Other GETs are cache-first; only complete same-origin 200s are stored.
//!
//! Requests are intercepted with this worker's partitions once it is activated.
//! While an upgrade waits, the previously active generation keeps serving.
//! Activation deletes every partition that does not belong to the configured
//! cache generation.

mod lifecycle;
mod message;

pub use lifecycle::{ReloadGuard, WorkerState};
pub use message::{ControlMessage, MessageOutcome};

use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStorage, FetchResult, PartitionKind};
use crate::config::Config;
use crate::http::{cache_key, HttpRequest, HttpResponse, Method, Network, TransportError};

/// Static settings the interceptor needs from the configuration.
#[derive(Debug, Clone)]
pub struct InterceptorSettings {
  /// Origin of the app; relative paths resolve against it
  pub origin: Url,
  /// Path prefix of the API namespace
  pub api_prefix: String,
  /// Cache generation tag
  pub version: String,
  /// Static paths cached on install
  pub precache: Vec<String>,
}

impl InterceptorSettings {
  pub fn from_config(config: &Config) -> Result<Self> {
    Ok(Self {
      origin: config.base_url()?,
      api_prefix: config.api.prefix.clone(),
      version: config.cache.version.clone(),
      precache: config.cache.precache.clone(),
    })
  }

  pub fn partition_name(&self, kind: PartitionKind) -> String {
    kind.name(&self.version)
  }

  /// Resolve a path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid URL '{}': {}", path, e))
  }

  fn is_api(&self, url: &Url) -> bool {
    if url.origin() != self.origin.origin() {
      return false;
    }
    let path = url.path();
    path.starts_with(&self.api_prefix) || path == self.api_prefix.trim_end_matches('/')
  }
}

/// Caching strategy for a request class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Not intercepted
  NetworkOnly,
  /// API data: freshest when reachable, cached copy when not
  NetworkFirst,
  /// Static assets: cached copy whenever present
  CacheFirst,
}

impl Strategy {
  pub fn for_request(request: &HttpRequest, settings: &InterceptorSettings) -> Self {
    if request.method != Method::Get {
      Strategy::NetworkOnly
    } else if settings.is_api(&request.url) {
      Strategy::NetworkFirst
    } else {
      Strategy::CacheFirst
    }
  }
}

/// Body returned for an API GET that is offline with nothing cached.
pub fn offline_response() -> HttpResponse {
  HttpResponse::json(
    503,
    &json!({
      "error": "offline",
      "message": "No cached data available",
    }),
  )
}

pub struct FetchInterceptor<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: N,
  settings: InterceptorSettings,
  state: Mutex<WorkerState>,
}

impl<S: CacheStorage, N: Network> FetchInterceptor<S, N> {
  pub fn new(storage: Arc<S>, network: N, settings: InterceptorSettings) -> Self {
    Self {
      storage,
      network,
      settings,
      state: Mutex::new(WorkerState::default()),
    }
  }

  pub fn settings(&self) -> &InterceptorSettings {
    &self.settings
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn state(&self) -> WorkerState {
    self
      .state
      .lock()
      .map(|s| *s)
      .unwrap_or(WorkerState::Redundant)
  }

  fn set_state(&self, to: WorkerState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    lifecycle::transition(&mut state, to)
  }

  /// Bring the worker up.
  ///
  /// If the configured generation is already the active one, the worker resumes
  /// as activated without touching the cache. Otherwise it installs, and activates
  /// right away only when no earlier generation was ever active; an upgrade waits
  /// for `SKIP_WAITING` or an explicit `activate`.
  pub async fn start(&self) -> Result<WorkerState> {
    match self.state() {
      WorkerState::Activated => return Ok(WorkerState::Activated),
      WorkerState::Waiting => return Ok(WorkerState::Waiting),
      _ => {}
    }

    let active = self.storage.active_generation()?;
    if active.as_deref() == Some(self.settings.version.as_str()) {
      self.set_state(WorkerState::Activated)?;
      info!("cache generation {} already active", self.settings.version);
      return Ok(WorkerState::Activated);
    }

    self.install().await?;

    match active {
      None => {
        self.activate()?;
      }
      Some(previous) => {
        info!(
          "cache generation {} installed, waiting to replace {}",
          self.settings.version, previous
        );
      }
    }

    Ok(self.state())
  }

  /// Pre-cache the static manifest. Any failure makes the worker redundant.
  pub async fn install(&self) -> Result<()> {
    self.set_state(WorkerState::Installing)?;

    match self.precache().await {
      Ok(count) => {
        info!(
          "installed cache generation {} ({} assets pre-cached)",
          self.settings.version, count
        );
        self.set_state(WorkerState::Waiting)
      }
      Err(e) => {
        warn!("install failed: {}", e);
        let _ = self.set_state(WorkerState::Redundant);
        Err(e)
      }
    }
  }

  async fn precache(&self) -> Result<usize> {
    use futures::future::try_join_all;

    // Fetch everything first so a failure stores nothing
    let fetched = try_join_all(self.settings.precache.iter().map(|path| async move {
      let request = HttpRequest::get(self.settings.resolve(path)?);
      let response = self
        .network
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Failed to pre-cache {}: {}", path, e))?;

      if !response.is_ok() {
        return Err(eyre!(
          "Failed to pre-cache {}: HTTP {}",
          path,
          response.status
        ));
      }
      Ok((request.cache_key(), response))
    }))
    .await?;

    let partition = self
      .storage
      .open(&self.settings.partition_name(PartitionKind::Static))?;
    for (key, response) in &fetched {
      self.storage.put(&partition, key, response)?;
    }

    Ok(fetched.len())
  }

  /// Activate a waiting worker: delete other generations and start intercepting.
  ///
  /// Returns the names of the deleted partitions. Calling it on an already
  /// activated worker does nothing.
  pub fn activate(&self) -> Result<Vec<String>> {
    if self.state() == WorkerState::Activated {
      return Ok(Vec::new());
    }

    self.set_state(WorkerState::Activating)?;

    match self.rollover() {
      Ok(deleted) => {
        self.set_state(WorkerState::Activated)?;
        Ok(deleted)
      }
      Err(e) => {
        warn!("activation failed: {}", e);
        let _ = self.set_state(WorkerState::Redundant);
        Err(e)
      }
    }
  }

  fn rollover(&self) -> Result<Vec<String>> {
    let keep = [
      self.settings.partition_name(PartitionKind::Static),
      self.settings.partition_name(PartitionKind::Api),
    ];
    let keep_refs: Vec<&str> = keep.iter().map(String::as_str).collect();

    let deleted = self.storage.delete_partitions_not_in(&keep_refs)?;
    for name in &keep {
      self.storage.open(name)?;
    }
    self.storage.set_active_generation(&self.settings.version)?;

    if deleted.is_empty() {
      info!("activated cache generation {}", self.settings.version);
    } else {
      info!(
        "activated cache generation {}, deleted partitions: {}",
        self.settings.version,
        deleted.join(", ")
      );
    }

    Ok(deleted)
  }

  /// Handle a control message.
  pub fn handle_message(&self, message: ControlMessage) -> Result<MessageOutcome> {
    match message {
      ControlMessage::SkipWaiting => {
        if self.state() != WorkerState::Waiting {
          debug!("skip waiting ignored in state {}", self.state().as_str());
          return Ok(MessageOutcome::NotWaiting);
        }
        let deleted = self.activate()?;
        Ok(MessageOutcome::Activated { deleted })
      }
      ControlMessage::CacheApi { url, response } => {
        let url = self.settings.resolve(&url)?;
        let key = cache_key(Method::Get, &url);
        let partition = self
          .storage
          .open(&self.settings.partition_name(PartitionKind::Api))?;

        self
          .storage
          .put(&partition, &key, &HttpResponse::json(200, &response))?;
        debug!("seeded api cache for {}", url);

        Ok(MessageOutcome::Cached { cache_key: key })
      }
    }
  }

  /// Parse and handle a control message in its JSON wire form.
  pub fn handle_raw_message(&self, raw: &str) -> Result<MessageOutcome> {
    let message = ControlMessage::parse(raw).inspect_err(|e| warn!("{}", e))?;
    self.handle_message(message)
  }

  /// Serve a request according to its strategy.
  ///
  /// Only transport errors surface: a cache-first miss that cannot reach the
  /// network, or any request while no generation controls the cache.
  pub async fn fetch(&self, request: &HttpRequest) -> Result<FetchResult, TransportError> {
    let Some(version) = self.controlling_generation() else {
      return self
        .network
        .fetch(request)
        .await
        .map(FetchResult::from_network);
    };

    match Strategy::for_request(request, &self.settings) {
      Strategy::NetworkOnly => self
        .network
        .fetch(request)
        .await
        .map(FetchResult::from_network),
      Strategy::NetworkFirst => Ok(self.network_first(request, &version).await),
      Strategy::CacheFirst => self.cache_first(request, &version).await,
    }
  }

  /// Generation whose partitions serve requests: this worker's once activated,
  /// the previously active one while this worker waits to replace it.
  fn controlling_generation(&self) -> Option<String> {
    match self.state() {
      WorkerState::Activated => Some(self.settings.version.clone()),
      WorkerState::Waiting => match self.storage.active_generation() {
        Ok(active) => active,
        Err(e) => {
          warn!("could not read active cache generation: {}", e);
          None
        }
      },
      _ => None,
    }
  }

  async fn network_first(&self, request: &HttpRequest, version: &str) -> FetchResult {
    let key = request.cache_key();

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store_quietly(PartitionKind::Api, version, &key, &response);
        }
        FetchResult::from_network(response)
      }
      Err(e) => match self.lookup_quietly(PartitionKind::Api, version, &key) {
        Some(entry) => {
          debug!("network failed ({}), serving cached {}", e, key);
          FetchResult::from_cache(entry)
        }
        None => {
          warn!("network failed ({}) and nothing cached for {}", e, key);
          FetchResult::offline(offline_response())
        }
      },
    }
  }

  async fn cache_first(
    &self,
    request: &HttpRequest,
    version: &str,
  ) -> Result<FetchResult, TransportError> {
    let key = request.cache_key();

    if let Some(entry) = self.lookup_quietly(PartitionKind::Static, version, &key) {
      debug!("cache hit {}", key);
      return Ok(FetchResult::from_cache(entry));
    }

    let response = self.network.fetch(request).await?;
    if response.is_complete_basic() {
      self.store_quietly(PartitionKind::Static, version, &key, &response);
    } else {
      debug!(
        "not caching {} (status {}, type {}, redirected {})",
        key,
        response.status,
        response.response_type.as_str(),
        response.redirected
      );
    }

    Ok(FetchResult::from_network(response))
  }

  /// Cache lookup where a storage failure counts as a miss.
  fn lookup_quietly(
    &self,
    kind: PartitionKind,
    version: &str,
    key: &str,
  ) -> Option<CacheEntry> {
    let result = self
      .storage
      .open(&kind.name(version))
      .and_then(|partition| self.storage.match_entry(&partition, key));

    match result {
      Ok(entry) => entry,
      Err(e) => {
        warn!("cache lookup failed for {}: {}", key, e);
        None
      }
    }
  }

  /// Cache write whose failure never fails the request.
  fn store_quietly(
    &self,
    kind: PartitionKind,
    version: &str,
    key: &str,
    response: &HttpResponse,
  ) {
    let result = self
      .storage
      .open(&kind.name(version))
      .and_then(|partition| self.storage.put(&partition, key, response));

    if let Err(e) = result {
      warn!("failed to cache {}: {}", key, e);
    }
  }
}
