//! Cache storage implementations: SQLite-backed and no-op.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use super::traits::{CacheEntry, CacheStorage, PartitionHandle, PartitionInfo};
use crate::http::{Headers, HttpResponse, ResponseType};
use crate::store::Store;

/// Key under which the active cache generation is stored.
const GENERATION_KEY: &str = "cache_generation";

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn open(&self, name: &str) -> Result<PartitionHandle> {
    Ok(PartitionHandle::new(name))
  }

  fn match_entry(&self, _partition: &PartitionHandle, _key: &str) -> Result<Option<CacheEntry>> {
    Ok(None) // Always miss
  }

  fn put(&self, _partition: &PartitionHandle, _key: &str, _response: &HttpResponse) -> Result<()> {
    Ok(()) // Discard
  }

  fn delete(&self, _partition: &PartitionHandle, _key: &str) -> Result<bool> {
    Ok(false)
  }

  fn delete_partitions_not_in(&self, _keep: &[&str]) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn partitions(&self) -> Result<Vec<PartitionInfo>> {
    Ok(Vec::new())
  }

  fn active_generation(&self) -> Result<Option<String>> {
    Ok(None)
  }

  fn set_active_generation(&self, _version: &str) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  store: Arc<Store>,
}

impl SqliteStorage {
  pub fn new(store: Arc<Store>) -> Self {
    Self { store }
  }
}

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<PartitionHandle> {
    self.store.with_conn(|conn| {
      conn
        .execute(
          "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
          params![name],
        )
        .map_err(|e| eyre!("Failed to open partition {}: {}", name, e))?;
      Ok(())
    })?;

    Ok(PartitionHandle::new(name))
  }

  fn match_entry(&self, partition: &PartitionHandle, key: &str) -> Result<Option<CacheEntry>> {
    let row: Option<(u16, String, Vec<u8>, String, bool, String)> =
      self.store.with_conn(|conn| {
        conn
          .query_row(
            "SELECT status, headers, body, response_type, redirected, cached_at
             FROM cache_entries WHERE partition = ? AND cache_key = ?",
            params![partition.name(), key],
            |row| {
              Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
              ))
            },
          )
          .optional()
          .map_err(|e| eyre!("Failed to query cache entry: {}", e))
      })?;

    let Some((status, headers, body, response_type, redirected, cached_at)) = row else {
      return Ok(None);
    };

    let headers: Headers = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;

    Ok(Some(CacheEntry {
      partition: partition.name().to_string(),
      cache_key: key.to_string(),
      response: HttpResponse {
        status,
        headers,
        body,
        response_type: response_type.parse::<ResponseType>()?,
        redirected,
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, partition: &PartitionHandle, key: &str, response: &HttpResponse) -> Result<()> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    self.store.transaction(|tx| {
      tx.execute(
        "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
        params![partition.name()],
      )
      .map_err(|e| eyre!("Failed to open partition {}: {}", partition.name(), e))?;

      tx.execute(
        "INSERT OR REPLACE INTO cache_entries
           (partition, cache_key, status, headers, body, response_type, redirected, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          partition.name(),
          key,
          response.status,
          headers,
          response.body,
          response.response_type.as_str(),
          response.redirected,
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

      Ok(())
    })
  }

  fn delete(&self, partition: &PartitionHandle, key: &str) -> Result<bool> {
    self.store.with_conn(|conn| {
      let removed = conn
        .execute(
          "DELETE FROM cache_entries WHERE partition = ? AND cache_key = ?",
          params![partition.name(), key],
        )
        .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;
      Ok(removed > 0)
    })
  }

  fn delete_partitions_not_in(&self, keep: &[&str]) -> Result<Vec<String>> {
    self.store.transaction(|tx| {
      let names: Vec<String> = {
        let mut stmt = tx
          .prepare("SELECT name FROM cache_partitions ORDER BY name")
          .map_err(|e| eyre!("Failed to prepare partition query: {}", e))?;

        let rows = stmt
          .query_map([], |row| row.get(0))
          .map_err(|e| eyre!("Failed to list partitions: {}", e))?;

        rows
          .collect::<rusqlite::Result<Vec<String>>>()
          .map_err(|e| eyre!("Failed to read partition name: {}", e))?
      };

      let stale: Vec<String> = names
        .into_iter()
        .filter(|name| !keep.contains(&name.as_str()))
        .collect();

      for name in &stale {
        tx.execute(
          "DELETE FROM cache_entries WHERE partition = ?",
          params![name],
        )
        .map_err(|e| eyre!("Failed to delete entries of partition {}: {}", name, e))?;

        tx.execute("DELETE FROM cache_partitions WHERE name = ?", params![name])
          .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;
      }

      Ok(stale)
    })
  }

  fn partitions(&self) -> Result<Vec<PartitionInfo>> {
    self.store.with_conn(|conn| {
      let mut stmt = conn
        .prepare(
          "SELECT p.name, COUNT(e.cache_key) FROM cache_partitions p
           LEFT JOIN cache_entries e ON e.partition = p.name
           GROUP BY p.name
           ORDER BY p.name",
        )
        .map_err(|e| eyre!("Failed to prepare partition query: {}", e))?;

      let rows = stmt
        .query_map([], |row| {
          Ok(PartitionInfo {
            name: row.get(0)?,
            entries: row.get::<_, i64>(1)? as usize,
          })
        })
        .map_err(|e| eyre!("Failed to list partitions: {}", e))?;

      rows
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to read partition row: {}", e))
    })
  }

  fn active_generation(&self) -> Result<Option<String>> {
    self.store.get_value(GENERATION_KEY)
  }

  fn set_active_generation(&self, version: &str) -> Result<()> {
    self.store.set_value(GENERATION_KEY, version)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn storage() -> SqliteStorage {
    SqliteStorage::new(Arc::new(Store::open_in_memory().unwrap()))
  }

  const KEY: &str = "GET https://app.example.com/api/categories";

  #[test]
  fn test_open_is_idempotent() {
    let storage = storage();
    let first = storage.open("api-v2").unwrap();
    let second = storage.open("api-v2").unwrap();

    assert_eq!(first, second);
    assert_eq!(
      storage.partitions().unwrap(),
      vec![PartitionInfo {
        name: "api-v2".to_string(),
        entries: 0,
      }]
    );
  }

  #[test]
  fn test_put_then_match_returns_same_response() {
    let storage = storage();
    let api = storage.open("api-v2").unwrap();
    let response = HttpResponse::new(200, br#"[{"id":1}]"#.to_vec())
      .with_header("content-type", "application/json");

    storage.put(&api, KEY, &response).unwrap();

    let entry = storage.match_entry(&api, KEY).unwrap().unwrap();
    assert_eq!(entry.response, response);
    assert_eq!(entry.partition, "api-v2");
  }

  #[test]
  fn test_put_overwrites_existing_entry() {
    let storage = storage();
    let api = storage.open("api-v2").unwrap();

    storage.put(&api, KEY, &HttpResponse::new(200, "old")).unwrap();
    storage.put(&api, KEY, &HttpResponse::new(200, "new")).unwrap();

    let entry = storage.match_entry(&api, KEY).unwrap().unwrap();
    assert_eq!(entry.response.body, b"new");
    assert_eq!(storage.partitions().unwrap()[0].entries, 1);
  }

  #[test]
  fn test_partitions_are_isolated() {
    let storage = storage();
    let api = storage.open("api-v2").unwrap();
    let assets = storage.open("static-v2").unwrap();

    storage.put(&api, KEY, &HttpResponse::new(200, "api")).unwrap();
    assert!(storage.match_entry(&assets, KEY).unwrap().is_none());

    storage.put(&assets, KEY, &HttpResponse::new(200, "asset")).unwrap();
    assert_eq!(
      storage.match_entry(&api, KEY).unwrap().unwrap().response.body,
      b"api"
    );
    assert_eq!(
      storage.match_entry(&assets, KEY).unwrap().unwrap().response.body,
      b"asset"
    );
  }

  #[test]
  fn test_delete_single_entry() {
    let storage = storage();
    let api = storage.open("api-v2").unwrap();
    storage.put(&api, KEY, &HttpResponse::new(200, "x")).unwrap();

    assert!(storage.delete(&api, KEY).unwrap());
    assert!(!storage.delete(&api, KEY).unwrap());
    assert!(storage.match_entry(&api, KEY).unwrap().is_none());
  }

  #[test]
  fn test_delete_partitions_not_in_drops_old_generation() {
    let storage = storage();
    let old_api = storage.open("api-v1").unwrap();
    let old_static = storage.open("static-v1").unwrap();
    storage.put(&old_api, KEY, &HttpResponse::new(200, "v1")).unwrap();
    storage.put(&old_static, KEY, &HttpResponse::new(200, "v1")).unwrap();
    let new_api = storage.open("api-v2").unwrap();
    storage.put(&new_api, KEY, &HttpResponse::new(200, "v2")).unwrap();

    let deleted = storage
      .delete_partitions_not_in(&["api-v2", "static-v2"])
      .unwrap();

    assert_eq!(deleted, vec!["api-v1".to_string(), "static-v1".to_string()]);
    assert!(storage.match_entry(&old_api, KEY).unwrap().is_none());
    assert!(storage.match_entry(&old_static, KEY).unwrap().is_none());
    assert!(storage.match_entry(&new_api, KEY).unwrap().is_some());

    // A second pass with the same allow-list deletes nothing
    assert!(storage
      .delete_partitions_not_in(&["api-v2", "static-v2"])
      .unwrap()
      .is_empty());
    assert!(storage.match_entry(&new_api, KEY).unwrap().is_some());
  }

  #[test]
  fn test_active_generation_round_trip() {
    let storage = storage();
    assert_eq!(storage.active_generation().unwrap(), None);

    storage.set_active_generation("v2").unwrap();
    assert_eq!(storage.active_generation().unwrap().as_deref(), Some("v2"));
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    let api = storage.open("api-v2").unwrap();
    storage.put(&api, KEY, &HttpResponse::new(200, "x")).unwrap();

    assert!(storage.match_entry(&api, KEY).unwrap().is_none());
    assert!(storage.partitions().unwrap().is_empty());
  }
}
