//! Typed message bus between the interactive context and the background
//! replay trigger. The message set is closed by design.

use tokio::sync::broadcast;

/// Messages exchanged across contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMessage {
  /// Ask an interactive context to run a full sync so its state updates too.
  RunSync,
  /// A full sync pass finished; readers should re-read the mirror.
  SyncCompleted,
  /// A newly installed version wants to take over immediately.
  SkipWaiting,
}

/// Broadcast bus. The receiver count doubles as the "is any interactive
/// context attached" probe used by the background trigger.
#[derive(Clone)]
pub struct EventBus {
  tx: broadcast::Sender<SyncMessage>,
}

impl EventBus {
  pub fn new() -> Self {
    let (tx, _) = broadcast::channel(32);
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
    self.tx.subscribe()
  }

  /// Fire-and-forget: sending with no receivers is not an error.
  pub fn send(&self, msg: SyncMessage) {
    let _ = self.tx.send(msg);
  }

  pub fn has_listeners(&self) -> bool {
    self.tx.receiver_count() > 0
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn listener_count_tracks_subscriptions() {
    let bus = EventBus::new();
    assert!(!bus.has_listeners());

    let mut rx = bus.subscribe();
    assert!(bus.has_listeners());

    bus.send(SyncMessage::SkipWaiting);
    assert_eq!(rx.recv().await.unwrap(), SyncMessage::SkipWaiting);

    drop(rx);
    assert!(!bus.has_listeners());
  }

  #[test]
  fn send_without_listeners_is_a_noop() {
    let bus = EventBus::new();
    bus.send(SyncMessage::SyncCompleted);
  }
}
