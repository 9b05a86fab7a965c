//! Offline-first sync core for a study-tools app.
//!
//! Local mutations that cannot reach the REST backend are appended to a
//! durable pending-operation queue and replayed in order when connectivity
//! returns; the entity mirror is then refreshed as a wholesale snapshot of
//! the server. A caching gateway routes read requests through cache-first,
//! network-first, stale-while-revalidate or network-only policies.

pub mod api;
pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod store;
pub mod sync;
