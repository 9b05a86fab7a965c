//! SQLite implementation of the local store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::records::{Entity, OperationKind, QueuedOperation};
use super::LocalStore;
use crate::error::{Result, SyncError};

/// Schema for the three logical tables. Versioned additively: new tables and
/// indexes only, no destructive migration.
const SCHEMA: &str = r#"
-- Replaceable snapshot of the server's entity collection
CREATE TABLE IF NOT EXISTS entity_mirror (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Partitioned key/value cache (gateway responses, small documents)
CREATE TABLE IF NOT EXISTS generic_cache (
    partition TEXT NOT NULL,
    key TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, key)
);

-- Append-only queue of pending mutations
CREATE TABLE IF NOT EXISTS pending_sync (
    sync_id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_url TEXT NOT NULL,
    kind BLOB NOT NULL,
    extra_headers BLOB NOT NULL,
    timestamp TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_pending_sync_timestamp ON pending_sync(timestamp);
"#;

/// SQLite-backed store shared by the interactive and background contexts.
/// Atomicity is per call; there is no cross-call transaction.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open or create the store at an explicit path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| SyncError::StorageUnavailable(format!("create store directory: {e}")))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      SyncError::StorageUnavailable(format!("open store at {}: {e}", path.display()))
    })?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// In-memory store, used in tests and as a last-ditch fallback.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()?;
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| {
        SyncError::StorageUnavailable("could not determine data directory".to_string())
      })?;

    Ok(data_dir.join("studysync").join("store.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    self.lock()?.execute_batch(SCHEMA)?;
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::StorageUnavailable(format!("lock poisoned: {e}")))
  }
}

impl LocalStore for SqliteStore {
  fn put(&self, entity: &Entity) -> Result<()> {
    let conn = self.lock()?;
    let data = serde_json::to_vec(entity)?;
    conn.execute(
      "INSERT OR REPLACE INTO entity_mirror (id, data, cached_at)
       VALUES (?, ?, datetime('now'))",
      params![entity.id, data],
    )?;
    Ok(())
  }

  fn get(&self, id: &str) -> Result<Option<Entity>> {
    let conn = self.lock()?;
    let data: Option<Vec<u8>> = conn
      .query_row("SELECT data FROM entity_mirror WHERE id = ?", params![id], |row| row.get(0))
      .optional()?;

    match data {
      Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
      None => Ok(None),
    }
  }

  fn get_all(&self) -> Result<Vec<Entity>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT data FROM entity_mirror ORDER BY rowid")?;

    let entities = stmt
      .query_map([], |row| row.get::<_, Vec<u8>>(0))?
      .filter_map(|r| r.ok())
      .filter_map(|data| serde_json::from_slice(&data).ok())
      .collect();

    Ok(entities)
  }

  fn delete(&self, id: &str) -> Result<()> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM entity_mirror WHERE id = ?", params![id])?;
    Ok(())
  }

  fn replace_all(&self, entities: &[Entity]) -> Result<()> {
    let conn = self.lock()?;

    conn.execute("BEGIN TRANSACTION", [])?;
    let result = (|| -> Result<()> {
      conn.execute("DELETE FROM entity_mirror", [])?;
      for entity in entities {
        let data = serde_json::to_vec(entity)?;
        conn.execute(
          "INSERT OR REPLACE INTO entity_mirror (id, data, cached_at)
           VALUES (?, ?, datetime('now'))",
          params![entity.id, data],
        )?;
      }
      Ok(())
    })();

    match result {
      Ok(()) => {
        conn.execute("COMMIT", [])?;
        Ok(())
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(e)
      }
    }
  }

  fn enqueue(
    &self,
    target_url: &str,
    kind: OperationKind,
    extra_headers: BTreeMap<String, String>,
  ) -> Result<i64> {
    let conn = self.lock()?;
    let kind_data = serde_json::to_vec(&kind)?;
    let headers_data = serde_json::to_vec(&extra_headers)?;
    // Nanosecond RFC 3339 keeps the text column lexicographically sortable.
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);

    conn.execute(
      "INSERT INTO pending_sync (target_url, kind, extra_headers, timestamp, retry_count)
       VALUES (?, ?, ?, ?, 0)",
      params![target_url, kind_data, headers_data, timestamp],
    )?;

    Ok(conn.last_insert_rowid())
  }

  fn list_pending(&self) -> Result<Vec<QueuedOperation>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT sync_id, target_url, kind, extra_headers, timestamp, retry_count
       FROM pending_sync
       ORDER BY timestamp, sync_id",
    )?;

    let rows = stmt.query_map([], |row| {
      Ok((
        row.get::<_, i64>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, Vec<u8>>(2)?,
        row.get::<_, Vec<u8>>(3)?,
        row.get::<_, String>(4)?,
        row.get::<_, u32>(5)?,
      ))
    })?;

    let mut pending = Vec::new();
    for row in rows {
      let (sync_id, target_url, kind_data, headers_data, timestamp, retry_count) = row?;
      pending.push(QueuedOperation {
        sync_id,
        target_url,
        kind: serde_json::from_slice(&kind_data)?,
        extra_headers: serde_json::from_slice(&headers_data)?,
        timestamp: parse_timestamp(&timestamp)?,
        retry_count,
      });
    }

    Ok(pending)
  }

  fn dequeue(&self, sync_id: i64) -> Result<()> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM pending_sync WHERE sync_id = ?", params![sync_id])?;
    Ok(())
  }

  fn bump_retry(&self, sync_id: i64) -> Result<u32> {
    let conn = self.lock()?;
    conn.execute(
      "UPDATE pending_sync SET retry_count = retry_count + 1 WHERE sync_id = ?",
      params![sync_id],
    )?;

    let count = conn
      .query_row(
        "SELECT retry_count FROM pending_sync WHERE sync_id = ?",
        params![sync_id],
        |row| row.get(0),
      )
      .optional()?
      .unwrap_or(0);

    Ok(count)
  }

  fn clear_queue(&self) -> Result<()> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM pending_sync", [])?;
    Ok(())
  }

  fn put_cached<T: serde::Serialize>(&self, partition: &str, key: &str, value: &T) -> Result<()> {
    let conn = self.lock()?;
    let data = serde_json::to_vec(value)?;
    conn.execute(
      "INSERT OR REPLACE INTO generic_cache (partition, key, data, cached_at)
       VALUES (?, ?, ?, datetime('now'))",
      params![partition, key, data],
    )?;
    Ok(())
  }

  fn get_cached<T: serde::de::DeserializeOwned>(
    &self,
    partition: &str,
    key: &str,
  ) -> Result<Option<T>> {
    let conn = self.lock()?;
    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM generic_cache WHERE partition = ? AND key = ?",
        params![partition, key],
        |row| row.get(0),
      )
      .optional()?;

    match data {
      Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
      None => Ok(None),
    }
  }

  fn purge_partitions_except(&self, keep: &[&str]) -> Result<()> {
    let conn = self.lock()?;
    let placeholders = vec!["?"; keep.len()].join(", ");
    let sql = format!("DELETE FROM generic_cache WHERE partition NOT IN ({placeholders})");
    conn.execute(&sql, rusqlite::params_from_iter(keep.iter()))?;
    Ok(())
  }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| SyncError::StorageUnavailable(format!("bad timestamp {s:?}: {e}")))
}
