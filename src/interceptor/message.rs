//! Control messages posted to the interceptor.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

/// Control channel message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Activate a waiting worker immediately
  SkipWaiting,
  /// Seed the API partition with an already-fetched JSON response
  CacheApi {
    url: String,
    response: serde_json::Value,
  },
}

impl ControlMessage {
  /// Parse a message from its JSON wire form.
  pub fn parse(raw: &str) -> Result<Self> {
    serde_json::from_str(raw).map_err(|e| eyre!("Invalid control message: {}", e))
  }
}

/// What handling a message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
  /// The worker activated; carries the partitions deleted on the way
  Activated { deleted: Vec<String> },
  /// Nothing was waiting, so there was nothing to skip
  NotWaiting,
  /// The response was stored under this cache key
  Cached { cache_key: String },
}
