//! Record types persisted by the local store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A mirrored server entity: opaque server-assigned id plus arbitrary fields.
///
/// The mirror is a replaceable snapshot of the server's collection. It is
/// always overwritten wholesale (clear + rewrite), never merged, so entities
/// deleted server-side and local `temp-*` placeholders cannot linger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
  /// Server-assigned identifier (accepts Mongo-style `_id` on the wire).
  #[serde(alias = "_id")]
  pub id: String,
  /// Remaining entity fields, kept opaque.
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}

impl Entity {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      fields: Map::new(),
    }
  }

  pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
    self.fields.insert(key.into(), value);
    self
  }

  /// Client-only optimistic record awaiting its real server id.
  pub fn is_placeholder(&self) -> bool {
    self.id.starts_with("temp-")
  }
}

/// Mutation verb plus its verb-specific payload.
///
/// DELETE carries no body by construction; CREATE and UPDATE require one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum OperationKind {
  Create(Value),
  Update(Value),
  Delete,
}

impl OperationKind {
  /// Transport verb this operation replays as.
  pub fn verb(&self) -> &'static str {
    match self {
      Self::Create(_) => "POST",
      Self::Update(_) => "PUT",
      Self::Delete => "DELETE",
    }
  }

  pub fn body(&self) -> Option<&Value> {
    match self {
      Self::Create(body) | Self::Update(body) => Some(body),
      Self::Delete => None,
    }
  }
}

/// One not-yet-confirmed mutation in the pending queue.
///
/// Immutable after enqueue except for `retry_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
  /// Store-assigned, monotonically increasing key.
  pub sync_id: i64,
  /// Remote resource the operation applies to.
  pub target_url: String,
  pub kind: OperationKind,
  /// Headers captured at enqueue time (e.g. the auth token), replayed
  /// verbatim so the queue can drain without an authenticated context.
  #[serde(default)]
  pub extra_headers: BTreeMap<String, String>,
  /// Enqueue time; the only ordering key for replay.
  pub timestamp: DateTime<Utc>,
  /// Failed replay attempts so far.
  pub retry_count: u32,
}

/// A serialized HTTP response held by the caching gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Body as text, for diagnostics and tests.
  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn entity_accepts_mongo_style_id() {
    let entity: Entity = serde_json::from_value(json!({"_id": "abc", "text": "study"})).unwrap();
    assert_eq!(entity.id, "abc");
    assert_eq!(entity.fields["text"], json!("study"));
  }

  #[test]
  fn delete_has_no_body() {
    let op = OperationKind::Delete;
    assert_eq!(op.verb(), "DELETE");
    assert!(op.body().is_none());

    let encoded = serde_json::to_value(&op).unwrap();
    assert_eq!(encoded, json!({"type": "Delete"}));
  }

  #[test]
  fn placeholder_detection() {
    assert!(Entity::new("temp-1723").is_placeholder());
    assert!(!Entity::new("66f1a2").is_placeholder());
  }
}
