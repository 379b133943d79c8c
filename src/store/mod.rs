//! Durable SQLite store shared by the response cache and the mutation queue.
//!
//! A `Store` is an explicit object with an `open`/`dispose` lifecycle. It is
//! handed around by `Arc` so tests can build an isolated in-memory store each.

mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// SQLite-backed store. Holds `None` once disposed.
pub struct Store {
  conn: Mutex<Option<Connection>>,
}

impl Store {
  /// Open or create the store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
      }
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    Self::init(conn)
  }

  /// Open a throwaway store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::init(conn)
  }

  /// Get the default store path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("skilltree-offline").join("offline.db"))
  }

  fn init(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(Some(conn)),
    })
  }

  /// Close the underlying connection. Every later operation fails.
  pub fn dispose(&self) -> Result<()> {
    let mut guard = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(conn) = guard.take() {
      conn
        .close()
        .map_err(|(_, e)| eyre!("Failed to close store: {}", e))?;
    }

    Ok(())
  }

  /// Whether `dispose` has been called.
  pub fn is_disposed(&self) -> bool {
    self.conn.lock().map(|c| c.is_none()).unwrap_or(true)
  }

  /// Run `f` with exclusive access to the connection.
  pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
    let mut guard = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let conn = guard
      .as_mut()
      .ok_or_else(|| eyre!("Store has been disposed"))?;

    f(conn)
  }

  /// Run `f` inside a transaction, committing only if it succeeds.
  pub(crate) fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
    self.with_conn(|conn| {
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

      let value = f(&tx)?;

      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

      Ok(value)
    })
  }

  /// Read a value from the key-value table.
  pub fn get_value(&self, key: &str) -> Result<Option<String>> {
    self.with_conn(|conn| read_value(conn, key))
  }

  /// Write a value to the key-value table, replacing any previous value.
  pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
    self.with_conn(|conn| write_value(conn, key, value))
  }

  /// Read-modify-write a value atomically.
  ///
  /// `f` receives the current value (if any) and returns the replacement.
  pub fn update_value<T>(
    &self,
    key: &str,
    f: impl FnOnce(Option<String>) -> Result<(String, T)>,
  ) -> Result<T> {
    self.transaction(|tx| {
      let current = read_value(tx, key)?;
      let (next, out) = f(current)?;
      write_value(tx, key, &next)?;
      Ok(out)
    })
  }
}

fn read_value(conn: &Connection, key: &str) -> Result<Option<String>> {
  conn
    .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
      row.get(0)
    })
    .optional()
    .map_err(|e| eyre!("Failed to read value '{}': {}", key, e))
}

fn write_value(conn: &Connection, key: &str, value: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))",
      params![key, value],
    )
    .map_err(|e| eyre!("Failed to write value '{}': {}", key, e))?;
  Ok(())
}
