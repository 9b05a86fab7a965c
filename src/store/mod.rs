//! Persistent local store: entity mirror, generic cache and pending queue.
//!
//! Three logical tables back the offline-first core:
//! - `entity_mirror` — replaceable snapshot of the server's collection
//! - `generic_cache` — partitioned key/value cache (gateway responses,
//!   arbitrary small documents such as user settings)
//! - `pending_sync` — append-only queue of not-yet-confirmed mutations

mod records;
mod sqlite;

pub use records::{CachedResponse, Entity, OperationKind, QueuedOperation};
pub use sqlite::SqliteStore;

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// Storage seam between the sync engine / caching gateway and the backing
/// database. All writes are durable; failures map to
/// [`SyncError::StorageUnavailable`](crate::error::SyncError) and callers
/// treat them as best-effort.
pub trait LocalStore: Send + Sync {
  // --- entity mirror ---

  fn put(&self, entity: &Entity) -> Result<()>;

  fn get(&self, id: &str) -> Result<Option<Entity>>;

  fn get_all(&self) -> Result<Vec<Entity>>;

  fn delete(&self, id: &str) -> Result<()>;

  /// Clear then insert, as one transaction. The mirror mirrors the server:
  /// entities deleted remotely and `temp-*` placeholders disappear here.
  fn replace_all(&self, entities: &[Entity]) -> Result<()>;

  // --- pending queue ---

  /// Append an operation; the store assigns `sync_id` and `timestamp`.
  fn enqueue(
    &self,
    target_url: &str,
    kind: OperationKind,
    extra_headers: BTreeMap<String, String>,
  ) -> Result<i64>;

  /// All pending operations, ordered by timestamp ascending (replay order).
  fn list_pending(&self) -> Result<Vec<QueuedOperation>>;

  fn dequeue(&self, sync_id: i64) -> Result<()>;

  /// Increment an operation's retry count, returning the new value.
  fn bump_retry(&self, sync_id: i64) -> Result<u32>;

  fn clear_queue(&self) -> Result<()>;

  // --- generic cache ---

  fn put_cached<T: Serialize>(&self, partition: &str, key: &str, value: &T) -> Result<()>;

  fn get_cached<T: DeserializeOwned>(&self, partition: &str, key: &str) -> Result<Option<T>>;

  /// Delete every cache partition not on the allow-list. Run on activation
  /// of a new version so stale partitions cannot grow unbounded.
  fn purge_partitions_except(&self, keep: &[&str]) -> Result<()>;
}
