//! Two-partition response cache.
//!
//! Responses are stored per named partition and keyed by request identity
//! (method + absolute URL). Partition names carry a generation suffix
//! (`static-v2`, `api-v2`) so a new deploy orphans the previous generation,
//! which is then deleted wholesale on activation.

mod storage;
mod traits;

pub use storage::{NoopStorage, SqliteStorage};
pub use traits::{
  CacheEntry, CacheSource, CacheStorage, FetchResult, PartitionHandle, PartitionInfo,
  PartitionKind,
};
