//! Error taxonomy for the sync core.
//!
//! None of these should ever surface to a user as a crash: callers degrade to
//! "serve what we have" (reads) or "queue for later" (writes).

use std::time::Duration;

use thiserror::Error;

/// Result type alias using the sync core's error.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur in the offline-sync core.
#[derive(Error, Debug)]
pub enum SyncError {
  /// The local store cannot persist (disk full, locked database, read-only
  /// filesystem). Writes are best-effort: log and continue.
  #[error("Storage unavailable: {0}")]
  StorageUnavailable(String),

  /// The transport could not complete the request at all.
  #[error("Network unreachable: {0}")]
  NetworkUnreachable(String),

  /// The server deterministically refused the operation (4xx). Non-retriable.
  #[error("Rejected by server with client error {status}")]
  ClientRejected { status: u16 },

  /// Transient server-side failure (5xx). Retriable.
  #[error("Server error {status}")]
  ServerTransient { status: u16 },

  /// A bounded fetch exceeded its deadline.
  #[error("Timed out after {0:?}")]
  Timeout(Duration),

  /// Invalid configuration (bad base URL, malformed target URL).
  #[error("Invalid configuration: {0}")]
  InvalidConfig(String),

  /// Serialization error for a stored record or request body.
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for SyncError {
  fn from(e: rusqlite::Error) -> Self {
    Self::StorageUnavailable(e.to_string())
  }
}

impl From<reqwest::Error> for SyncError {
  fn from(e: reqwest::Error) -> Self {
    Self::NetworkUnreachable(e.to_string())
  }
}

impl SyncError {
  /// True when a replay attempt that produced this error should stay queued.
  pub fn is_retriable(&self) -> bool {
    matches!(
      self,
      Self::NetworkUnreachable(_) | Self::ServerTransient { .. } | Self::Timeout(_)
    )
  }
}
