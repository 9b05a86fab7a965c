//! Offline-first write path used by the interactive context.
//!
//! Mutations try the network first. When the network is unreachable (or the
//! server is transiently failing) the operation is appended to the pending
//! queue with its auth headers captured, and the mirror gets an optimistic
//! write-through so the UI keeps working offline.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::api::{classify_status, ApiClient};
use crate::error::Result;
use crate::store::{Entity, LocalStore, OperationKind};

/// What happened to a submitted mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
  /// The server accepted the mutation.
  Applied,
  /// Saved locally, will sync: queued for background replay.
  Queued,
}

pub struct OfflineFirstClient<S: LocalStore> {
  api: ApiClient,
  store: Arc<S>,
}

impl<S: LocalStore> OfflineFirstClient<S> {
  pub fn new(api: ApiClient, store: Arc<S>) -> Self {
    Self { api, store }
  }

  /// Submit a mutation. Retriable failures queue the operation and report
  /// [`SubmitOutcome::Queued`]; a deterministic server rejection (4xx)
  /// surfaces to the caller since the action is still interactive.
  pub async fn submit(
    &self,
    target_url: &str,
    kind: OperationKind,
    extra_headers: BTreeMap<String, String>,
  ) -> Result<SubmitOutcome> {
    match self.api.send(target_url, &kind, &extra_headers).await {
      Ok(status) if status.is_success() => Ok(SubmitOutcome::Applied),
      Ok(status) => {
        let err = classify_status(status);
        if err.is_retriable() {
          self.queue_locally(target_url, kind, extra_headers)
        } else {
          Err(err)
        }
      }
      Err(err) if err.is_retriable() => self.queue_locally(target_url, kind, extra_headers),
      Err(err) => Err(err),
    }
  }

  /// Append to the pending queue and write through to the mirror so the
  /// change is visible offline. Storage failure degrades to best-effort:
  /// the caller's optimistic update stands but may not survive a reload.
  fn queue_locally(
    &self,
    target_url: &str,
    kind: OperationKind,
    extra_headers: BTreeMap<String, String>,
  ) -> Result<SubmitOutcome> {
    let sync_id = self.store.enqueue(target_url, kind.clone(), extra_headers)?;

    if let Err(err) = self.write_through(target_url, &kind) {
      warn!(sync_id, "mirror write-through failed: {err}");
    }

    info!(sync_id, url = %target_url, "operation queued for background replay");
    Ok(SubmitOutcome::Queued)
  }

  fn write_through(&self, target_url: &str, kind: &OperationKind) -> Result<()> {
    match kind {
      OperationKind::Create(body) => {
        // Placeholder id; the next mirror snapshot replaces it with the
        // server-assigned record.
        let id = format!("temp-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
        if let Some(entity) = entity_from_body(id, body) {
          self.store.put(&entity)?;
        }
      }
      OperationKind::Update(body) => {
        let Some(id) = id_from_url(target_url) else {
          return Ok(());
        };
        if let Some(mut entity) = self.store.get(id)? {
          if let Value::Object(patch) = body {
            for (key, value) in patch {
              entity.fields.insert(key.clone(), value.clone());
            }
          }
          self.store.put(&entity)?;
        }
      }
      OperationKind::Delete => {
        if let Some(id) = id_from_url(target_url) {
          self.store.delete(id)?;
        }
      }
    }
    Ok(())
  }
}

fn entity_from_body(id: String, body: &Value) -> Option<Entity> {
  let Value::Object(fields) = body else {
    return None;
  };
  let mut entity = Entity::new(id);
  entity.fields = fields.clone();
  entity.fields.remove("id");
  entity.fields.remove("_id");
  Some(entity)
}

/// Last path segment of a mutation URL, the conventional resource id.
fn id_from_url(target_url: &str) -> Option<&str> {
  let path = target_url.split('?').next().unwrap_or(target_url);
  path.trim_end_matches('/').rsplit('/').next().filter(|s| !s.is_empty())
}
