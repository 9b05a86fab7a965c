//! Background replay trigger: drains the queue opportunistically when
//! connectivity returns, even with no interactive context attached.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::SyncEngine;
use crate::event::{EventBus, SyncMessage};
use crate::store::LocalStore;

/// The single tag registered with the host's deferred-task facility.
pub const SYNC_TAG_PENDING: &str = "sync-pending";

/// Shared connectivity signal. The sender side is fed by whatever observes
/// the network (an OS hook, a periodic probe); receivers see transitions.
pub fn connectivity_channel(online: bool) -> (watch::Sender<bool>, watch::Receiver<bool>) {
  watch::channel(online)
}

/// Deferred replay registration. Firing prefers an attached interactive
/// context (so UI state updates with the sync); with none attached it runs a
/// reduced, headless replay.
pub struct BackgroundTrigger<S: LocalStore> {
  tag: &'static str,
  engine: Arc<SyncEngine<S>>,
  bus: EventBus,
}

impl<S: LocalStore + 'static> BackgroundTrigger<S> {
  /// Best-effort registration with the host environment.
  pub fn register(engine: Arc<SyncEngine<S>>, bus: EventBus) -> Self {
    info!(tag = SYNC_TAG_PENDING, "background sync trigger registered");
    Self {
      tag: SYNC_TAG_PENDING,
      engine,
      bus,
    }
  }

  pub fn tag(&self) -> &str {
    self.tag
  }

  /// Fire the trigger once. With a listener attached, hand the sync to the
  /// interactive context; otherwise replay the queue headlessly (no mirror
  /// refresh, no completion signal — there is nobody to notify).
  pub async fn fire(&self) {
    if self.bus.has_listeners() {
      debug!(tag = self.tag, "interactive context attached, delegating sync");
      self.bus.send(SyncMessage::RunSync);
    } else {
      debug!(tag = self.tag, "no interactive context, replaying headlessly");
      if let Err(err) = self.engine.process_pending().await {
        warn!("headless replay failed: {err}");
      }
    }
  }

  /// Watch connectivity and fire on every offline-to-online transition.
  pub fn watch(self: Arc<Self>, mut connectivity: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut was_online = *connectivity.borrow();
      while connectivity.changed().await.is_ok() {
        let online = *connectivity.borrow();
        if online && !was_online {
          debug!(tag = self.tag, "connectivity restored");
          self.fire().await;
        }
        was_online = online;
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::ApiClient;
  use crate::store::{OperationKind, SqliteStore};
  use crate::sync::SyncOptions;
  use httpmock::prelude::*;
  use serde_json::json;
  use std::collections::BTreeMap;
  use std::time::Duration;

  fn setup(server: &MockServer) -> (Arc<SyncEngine<SqliteStore>>, EventBus) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let api = ApiClient::new(&server.base_url(), None).unwrap();
    let bus = EventBus::new();
    let engine = Arc::new(SyncEngine::new(store, api, bus.clone(), SyncOptions::default()));
    (engine, bus)
  }

  #[tokio::test]
  async fn headless_fire_replays_queue() {
    let server = MockServer::start_async().await;
    let create = server
      .mock_async(|when, then| {
        when.method(POST).path("/api/tasks");
        then.status(201);
      })
      .await;

    let (engine, bus) = setup(&server);
    engine
      .store()
      .enqueue("/api/tasks", OperationKind::Create(json!({"text": "x"})), BTreeMap::new())
      .unwrap();

    let trigger = BackgroundTrigger::register(Arc::clone(&engine), bus);
    trigger.fire().await;

    assert!(engine.store().list_pending().unwrap().is_empty());
    create.assert_async().await;
  }

  #[tokio::test]
  async fn fire_with_listener_delegates_instead_of_replaying() {
    let server = MockServer::start_async().await;
    let create = server
      .mock_async(|when, then| {
        when.method(POST).path("/api/tasks");
        then.status(201);
      })
      .await;

    let (engine, bus) = setup(&server);
    engine
      .store()
      .enqueue("/api/tasks", OperationKind::Create(json!({"text": "x"})), BTreeMap::new())
      .unwrap();

    let mut rx = bus.subscribe();
    let trigger = BackgroundTrigger::register(Arc::clone(&engine), bus);
    trigger.fire().await;

    assert_eq!(rx.recv().await.unwrap(), SyncMessage::RunSync);
    // The queue is untouched: draining is the interactive context's job now.
    assert_eq!(engine.store().list_pending().unwrap().len(), 1);
    assert_eq!(create.hits_async().await, 0);
  }

  #[tokio::test]
  async fn watch_fires_on_reconnect_only() {
    let server = MockServer::start_async().await;
    let (engine, bus) = setup(&server);

    let mut rx = bus.subscribe();
    let trigger = Arc::new(BackgroundTrigger::register(engine, bus));
    let (tx, connectivity) = connectivity_channel(false);
    let task = trigger.watch(connectivity);

    // offline -> online fires
    tx.send(true).unwrap();
    let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(msg, SyncMessage::RunSync);

    // online -> online (no transition) stays quiet
    tx.send(true).unwrap();
    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err());

    task.abort();
  }
}
