//! Sync engine: drains the pending queue against the remote API, then
//! refreshes the entity mirror from the server.

mod client;
mod trigger;

pub use client::{OfflineFirstClient, SubmitOutcome};
pub use trigger::{connectivity_channel, BackgroundTrigger, SYNC_TAG_PENDING};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::config::RetryLimit;
use crate::error::{Result, SyncError};
use crate::event::{EventBus, SyncMessage};
use crate::store::{Entity, LocalStore, QueuedOperation};

/// Engine tuning knobs, normally derived from [`Config`](crate::config::Config).
#[derive(Debug, Clone)]
pub struct SyncOptions {
  /// Collection endpoint the mirror is refreshed from.
  pub tasks_path: String,
  pub max_retries: RetryLimit,
  /// Deadline for the mirror-refresh fetch.
  pub refresh_timeout: Duration,
  /// Deadline for each individual queue-item replay.
  pub replay_timeout: Duration,
  /// Queue length past which a warning is logged.
  pub queue_soft_cap: usize,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      tasks_path: "/api/tasks".to_string(),
      max_retries: RetryLimit::default(),
      refresh_timeout: Duration::from_secs(8),
      replay_timeout: Duration::from_secs(8),
      queue_soft_cap: 500,
    }
  }
}

/// Counters for one replay pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
  /// Operations confirmed by the server (2xx) and dequeued.
  pub replayed: usize,
  /// Operations dropped: rejected with 4xx or past the retry ceiling.
  pub dropped: usize,
  /// Operations still queued for a later pass.
  pub remaining: usize,
}

/// Replays the pending queue and maintains the mirror snapshot.
///
/// The re-entrancy guard is an explicit field, constructed once per process:
/// at most one full sync is in flight per engine, and a concurrent call is
/// skipped, not queued.
pub struct SyncEngine<S: LocalStore> {
  store: Arc<S>,
  api: ApiClient,
  bus: EventBus,
  options: SyncOptions,
  syncing: AtomicBool,
}

impl<S: LocalStore> SyncEngine<S> {
  pub fn new(store: Arc<S>, api: ApiClient, bus: EventBus, options: SyncOptions) -> Self {
    Self {
      store,
      api,
      bus,
      options,
      syncing: AtomicBool::new(false),
    }
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  /// Replay the entire pending queue, refresh the mirror, then emit
  /// [`SyncMessage::SyncCompleted`]. Returns `None` when another pass was
  /// already in flight and this call was skipped.
  pub async fn run_full_sync(&self) -> Result<Option<ReplayStats>> {
    if self
      .syncing
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("sync already in progress, skipping");
      return Ok(None);
    }

    let result = self.full_sync_inner().await;
    self.syncing.store(false, Ordering::SeqCst);
    result.map(Some)
  }

  async fn full_sync_inner(&self) -> Result<ReplayStats> {
    let stats = self.process_pending().await?;
    // Refresh degrades to the stale mirror on failure, so the UI signal
    // always fires after a completed pass.
    self.refresh_mirror().await?;
    self.bus.send(SyncMessage::SyncCompleted);
    Ok(stats)
  }

  /// Replay every queued operation in enqueue order, strictly sequentially.
  /// Out-of-order replay against the same resource could corrupt server
  /// state, so items are awaited one at a time.
  ///
  /// Per item: 2xx dequeues; 4xx is non-retriable and dequeues with a
  /// warning; 5xx and transport failures stay queued until the retry
  /// ceiling drops them. One item's failure never halts the pass.
  pub async fn process_pending(&self) -> Result<ReplayStats> {
    let pending = self.store.list_pending()?;
    let mut stats = ReplayStats::default();
    if pending.is_empty() {
      return Ok(stats);
    }
    if pending.len() > self.options.queue_soft_cap {
      warn!(
        len = pending.len(),
        cap = self.options.queue_soft_cap,
        "pending queue exceeds soft cap"
      );
    }

    for op in pending {
      match timeout(self.options.replay_timeout, self.api.execute(&op)).await {
        Ok(Ok(status)) if status.is_success() => {
          self.store.dequeue(op.sync_id)?;
          stats.replayed += 1;
        }
        Ok(Ok(status)) if status.is_client_error() => {
          warn!(
            sync_id = op.sync_id,
            status = status.as_u16(),
            url = %op.target_url,
            "replay rejected by server, dropping from queue"
          );
          self.store.dequeue(op.sync_id)?;
          stats.dropped += 1;
        }
        Ok(Ok(status)) => {
          let err = SyncError::ServerTransient {
            status: status.as_u16(),
          };
          self.note_retry(&op, &err, &mut stats)?;
        }
        Ok(Err(err)) => {
          self.note_retry(&op, &err, &mut stats)?;
        }
        Err(_) => {
          let err = SyncError::Timeout(self.options.replay_timeout);
          self.note_retry(&op, &err, &mut stats)?;
        }
      }
    }

    stats.remaining = self.store.list_pending()?.len();
    Ok(stats)
  }

  fn note_retry(&self, op: &QueuedOperation, err: &SyncError, stats: &mut ReplayStats) -> Result<()> {
    let retries = self.store.bump_retry(op.sync_id)?;
    if self.options.max_retries.exceeded(retries) {
      warn!(
        sync_id = op.sync_id,
        retries,
        url = %op.target_url,
        "retry ceiling reached, dropping from queue: {err}"
      );
      self.store.dequeue(op.sync_id)?;
      stats.dropped += 1;
    } else {
      warn!(sync_id = op.sync_id, retries, "replay failed, will retry: {err}");
    }
    Ok(())
  }

  /// Fetch the authoritative collection and overwrite the mirror snapshot.
  /// On timeout or network failure the stale mirror is served instead of an
  /// error, so reads never block on a dead network.
  pub async fn refresh_mirror(&self) -> Result<Vec<Entity>> {
    let fetch = self.api.fetch_entities(&self.options.tasks_path);
    match timeout(self.options.refresh_timeout, fetch).await {
      Ok(Ok(entities)) => {
        self.store.replace_all(&entities)?;
        Ok(entities)
      }
      Ok(Err(err)) => {
        warn!("mirror refresh failed, serving stale cache: {err}");
        self.store.get_all()
      }
      Err(_) => {
        warn!(
          timeout_secs = self.options.refresh_timeout.as_secs(),
          "mirror refresh timed out, serving stale cache"
        );
        self.store.get_all()
      }
    }
  }

  pub fn pending_count(&self) -> Result<usize> {
    Ok(self.store.list_pending()?.len())
  }
}
