//! Core traits and types for the response cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::http::HttpResponse;

/// Which of the two partitions a response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
  /// Entry document, manifest and other static assets
  Static,
  /// Responses from the API namespace
  Api,
}

impl PartitionKind {
  pub fn prefix(&self) -> &'static str {
    match self {
      Self::Static => "static",
      Self::Api => "api",
    }
  }

  /// Partition name for a cache generation, e.g. `api-v2`.
  pub fn name(&self, version: &str) -> String {
    format!("{}-{}", self.prefix(), version)
  }
}

/// Handle to an opened partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionHandle {
  name: String,
}

impl PartitionHandle {
  pub(crate) fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub partition: String,
  pub cache_key: String,
  pub response: HttpResponse,
  pub cached_at: DateTime<Utc>,
}

/// Partition name with its entry count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
  pub name: String,
  pub entries: usize,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Open a partition, creating it if absent.
  fn open(&self, name: &str) -> Result<PartitionHandle>;

  /// Look up the entry for a request key.
  fn match_entry(&self, partition: &PartitionHandle, key: &str) -> Result<Option<CacheEntry>>;

  /// Store a response, replacing any previous entry for the key.
  fn put(&self, partition: &PartitionHandle, key: &str, response: &HttpResponse) -> Result<()>;

  /// Remove a single entry. Returns whether one existed.
  fn delete(&self, partition: &PartitionHandle, key: &str) -> Result<bool>;

  /// Delete every partition whose name is not in `keep`. Returns the deleted names.
  fn delete_partitions_not_in(&self, keep: &[&str]) -> Result<Vec<String>>;

  /// List partitions with their entry counts.
  fn partitions(&self) -> Result<Vec<PartitionInfo>>;

  /// The cache generation that was last activated.
  fn active_generation(&self) -> Result<Option<String>>;

  /// Record the activated cache generation.
  fn set_active_generation(&self, version: &str) -> Result<()>;
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh response from the network
  Network,
  /// Served from a cache partition
  Cache,
  /// Offline with nothing cached: synthesized error response
  Offline,
}

/// A response plus metadata about its source.
#[derive(Debug, Clone)]
pub struct FetchResult {
  /// The actual response
  pub response: HttpResponse,
  /// Where the response came from
  pub source: CacheSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl FetchResult {
  /// Create a result from a network response.
  pub fn from_network(response: HttpResponse) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a result from a cache entry.
  pub fn from_cache(entry: CacheEntry) -> Self {
    Self {
      response: entry.response,
      source: CacheSource::Cache,
      cached_at: Some(entry.cached_at),
    }
  }

  /// Create a synthesized offline result.
  pub fn offline(response: HttpResponse) -> Self {
    Self {
      response,
      source: CacheSource::Offline,
      cached_at: None,
    }
  }

  /// Whether this is the "offline, no cached data" response.
  pub fn is_offline_placeholder(&self) -> bool {
    self.source == CacheSource::Offline
  }
}
