//! Caching gateway: intercepts read-style requests and applies one of the
//! caching policies over partitions of the generic cache.

mod classify;

pub use classify::{classify, GatewayRequest, RequestClass};

use std::sync::Arc;

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::{CachedResponse, LocalStore};

/// Cache partitions. Bumping a version suffix retires the old partition on
/// the next activation.
pub const CACHE_PRECACHE: &str = "precache-v3";
pub const CACHE_RUNTIME: &str = "runtime-v3";
pub const CACHE_API: &str = "api-v1";

const DEFAULT_OFFLINE_PAGE: &str = "/offline.html";

/// Where a gateway response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  Cache,
  /// The dedicated offline page, served when a navigation had no cache entry.
  OfflineFallback,
}

/// A handled response plus its provenance.
#[derive(Debug)]
pub struct GatewayResponse {
  pub response: CachedResponse,
  pub source: ResponseSource,
  /// Stale-while-revalidate only: the in-flight background refresh. Dropping
  /// the handle detaches the task; await it to observe the updated entry.
  pub revalidation: Option<JoinHandle<()>>,
}

/// Outcome of routing one request.
#[derive(Debug)]
pub enum GatewayOutcome {
  Handled(GatewayResponse),
  /// Non-GET requests are never intercepted; the caller performs them.
  Passthrough,
}

/// Policy executor over the store's cache partitions.
pub struct CachingGateway<S: LocalStore> {
  store: Arc<S>,
  http: reqwest::Client,
  tasks_path: String,
  offline_page: String,
}

impl<S: LocalStore + 'static> CachingGateway<S> {
  pub fn new(store: Arc<S>, tasks_path: impl Into<String>) -> Self {
    Self {
      store,
      http: reqwest::Client::new(),
      tasks_path: tasks_path.into(),
      offline_page: DEFAULT_OFFLINE_PAGE.to_string(),
    }
  }

  pub fn with_offline_page(mut self, page: impl Into<String>) -> Self {
    self.offline_page = page.into();
    self
  }

  /// Install step: seed the precache partition with the app shell.
  /// Best-effort per URL; a missing asset must not fail the install.
  pub async fn install(&self, urls: &[String]) {
    for url in urls {
      match fetch_response(&self.http, url).await {
        Ok(response) if response.is_success() => {
          if let Err(err) = self.store.put_cached(CACHE_PRECACHE, &cache_key(url), &response) {
            warn!(url = %url, "precache write failed: {err}");
          }
        }
        Ok(response) => warn!(url = %url, status = response.status, "precache fetch not cacheable"),
        Err(err) => warn!(url = %url, "precache fetch failed: {err}"),
      }
    }
  }

  /// Activation step: delete every cache partition not on the allow-list.
  pub fn activate(&self) -> Result<()> {
    self
      .store
      .purge_partitions_except(&[CACHE_PRECACHE, CACHE_RUNTIME, CACHE_API])
  }

  /// Route one request through its caching policy.
  pub async fn handle(&self, req: &GatewayRequest) -> Result<GatewayOutcome> {
    match classify(req, &self.tasks_path) {
      RequestClass::Passthrough => Ok(GatewayOutcome::Passthrough),
      RequestClass::NetworkOnly => {
        let response = fetch_response(&self.http, &req.url).await?;
        Ok(GatewayOutcome::Handled(GatewayResponse {
          response,
          source: ResponseSource::Network,
          revalidation: None,
        }))
      }
      RequestClass::CacheFirst => self.cache_first(req).await.map(GatewayOutcome::Handled),
      RequestClass::NetworkFirst => self.network_first(req).await.map(GatewayOutcome::Handled),
      RequestClass::StaleWhileRevalidate => {
        // The one cacheable API read gets its own partition so a version
        // bump of the asset caches cannot evict it.
        let partition = if req.path() == self.tasks_path {
          CACHE_API
        } else {
          CACHE_RUNTIME
        };
        self
          .stale_while_revalidate(req, partition)
          .await
          .map(GatewayOutcome::Handled)
      }
    }
  }

  /// Serve cached if present; otherwise fetch, cache on success, return.
  async fn cache_first(&self, req: &GatewayRequest) -> Result<GatewayResponse> {
    let key = cache_key(&req.url);
    if let Some(cached) = self.lookup(CACHE_RUNTIME, &key)? {
      return Ok(GatewayResponse {
        response: cached,
        source: ResponseSource::Cache,
        revalidation: None,
      });
    }

    let response = fetch_response(&self.http, &req.url).await?;
    if response.is_success() {
      self.store_best_effort(CACHE_RUNTIME, &key, &response);
    }
    Ok(GatewayResponse {
      response,
      source: ResponseSource::Network,
      revalidation: None,
    })
  }

  /// Attempt network, cache success; on failure serve the last cached copy,
  /// and for navigations fall back further to the offline page.
  async fn network_first(&self, req: &GatewayRequest) -> Result<GatewayResponse> {
    let key = cache_key(&req.url);
    match fetch_response(&self.http, &req.url).await {
      Ok(response) => {
        if response.is_success() {
          self.store_best_effort(CACHE_RUNTIME, &key, &response);
        }
        Ok(GatewayResponse {
          response,
          source: ResponseSource::Network,
          revalidation: None,
        })
      }
      Err(err) => {
        if let Some(cached) = self.lookup(CACHE_RUNTIME, &key)? {
          return Ok(GatewayResponse {
            response: cached,
            source: ResponseSource::Cache,
            revalidation: None,
          });
        }
        if req.navigation {
          if let Some(page) = self.lookup(CACHE_PRECACHE, &cache_key(&self.offline_page))? {
            return Ok(GatewayResponse {
              response: page,
              source: ResponseSource::OfflineFallback,
              revalidation: None,
            });
          }
        }
        Err(err)
      }
    }
  }

  /// Serve the cached copy immediately (no network wait) and refresh it in
  /// the background; fetch inline only on a cache miss.
  async fn stale_while_revalidate(
    &self,
    req: &GatewayRequest,
    partition: &'static str,
  ) -> Result<GatewayResponse> {
    let key = cache_key(&req.url);
    if let Some(cached) = self.lookup(partition, &key)? {
      let revalidation = self.spawn_revalidation(partition, key, req.url.clone());
      return Ok(GatewayResponse {
        response: cached,
        source: ResponseSource::Cache,
        revalidation: Some(revalidation),
      });
    }

    let response = fetch_response(&self.http, &req.url).await?;
    if response.is_success() {
      self.store_best_effort(partition, &key, &response);
    }
    Ok(GatewayResponse {
      response,
      source: ResponseSource::Network,
      revalidation: None,
    })
  }

  fn spawn_revalidation(&self, partition: &'static str, key: String, url: String) -> JoinHandle<()> {
    let store = Arc::clone(&self.store);
    let http = self.http.clone();
    tokio::spawn(async move {
      match fetch_response(&http, &url).await {
        Ok(response) if response.is_success() => {
          if let Err(err) = store.put_cached(partition, &key, &response) {
            warn!(url = %url, "revalidation write failed: {err}");
          }
        }
        Ok(response) => {
          debug!(url = %url, status = response.status, "revalidation not cacheable, keeping stale copy");
        }
        Err(err) => debug!(url = %url, "revalidation failed: {err}"),
      }
    })
  }

  /// Partition lookup with precache fallback (shell assets live there).
  fn lookup(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>> {
    if let Some(cached) = self.store.get_cached(partition, key)? {
      return Ok(Some(cached));
    }
    if partition != CACHE_PRECACHE {
      return self.store.get_cached(CACHE_PRECACHE, key);
    }
    Ok(None)
  }

  fn store_best_effort(&self, partition: &str, key: &str, response: &CachedResponse) {
    if let Err(err) = self.store.put_cached(partition, key, response) {
      warn!(partition, "cache write failed: {err}");
    }
  }
}

/// Stable fixed-length cache key: SHA-256 of the host-agnostic path+query.
fn cache_key(url: &str) -> String {
  let normalized = match url::Url::parse(url) {
    Ok(parsed) => match parsed.query() {
      Some(query) => format!("{}?{}", parsed.path(), query),
      None => parsed.path().to_string(),
    },
    Err(_) => url.to_string(),
  };

  let mut hasher = Sha256::new();
  hasher.update(normalized.as_bytes());
  hex::encode(hasher.finalize())
}

async fn fetch_response(http: &reqwest::Client, url: &str) -> Result<CachedResponse> {
  let res = http.get(url).send().await?;
  let status = res.status().as_u16();
  let content_type = res
    .headers()
    .get(CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .map(String::from);
  let body = res.bytes().await?.to_vec();

  Ok(CachedResponse {
    status,
    content_type,
    body,
    cached_at: Utc::now(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::SqliteStore;
  use httpmock::prelude::*;
  use serde_json::json;

  fn gateway(store: &Arc<SqliteStore>) -> CachingGateway<SqliteStore> {
    CachingGateway::new(Arc::clone(store), "/api/tasks")
  }

  fn cached(body: &str) -> CachedResponse {
    CachedResponse {
      status: 200,
      content_type: Some("application/json".to_string()),
      body: body.as_bytes().to_vec(),
      cached_at: Utc::now(),
    }
  }

  fn handled(outcome: GatewayOutcome) -> GatewayResponse {
    match outcome {
      GatewayOutcome::Handled(response) => response,
      GatewayOutcome::Passthrough => panic!("expected a handled response"),
    }
  }

  #[tokio::test]
  async fn cache_first_skips_the_network_on_a_hit() {
    let server = MockServer::start_async().await;
    let icon = server
      .mock_async(|when, then| {
        when.method(GET).path("/icons/logo.png");
        then.status(200).body("fresh icon bytes");
      })
      .await;

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let url = server.url("/icons/logo.png");
    store.put_cached(CACHE_RUNTIME, &cache_key(&url), &cached("cached icon bytes")).unwrap();

    let result = handled(gateway(&store).handle(&GatewayRequest::get(&url)).await.unwrap());
    assert_eq!(result.source, ResponseSource::Cache);
    assert_eq!(result.response.body_text(), "cached icon bytes");
    assert_eq!(icon.hits_async().await, 0);
  }

  #[tokio::test]
  async fn cache_first_fetches_and_caches_on_a_miss() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/icons/logo.png");
        then.status(200).body("icon bytes");
      })
      .await;

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let gw = gateway(&store);
    let url = server.url("/icons/logo.png");

    let first = handled(gw.handle(&GatewayRequest::get(&url)).await.unwrap());
    assert_eq!(first.source, ResponseSource::Network);

    let second = handled(gw.handle(&GatewayRequest::get(&url)).await.unwrap());
    assert_eq!(second.source, ResponseSource::Cache);
  }

  #[tokio::test]
  async fn stale_while_revalidate_serves_stale_then_updates() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/assets/app.3fa9c2.js");
        then.status(200).body("v2 bundle");
      })
      .await;

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let url = server.url("/assets/app.3fa9c2.js");
    store.put_cached(CACHE_RUNTIME, &cache_key(&url), &cached("v1 bundle")).unwrap();

    let gw = gateway(&store);
    let first = handled(gw.handle(&GatewayRequest::get(&url)).await.unwrap());
    assert_eq!(first.source, ResponseSource::Cache);
    assert_eq!(first.response.body_text(), "v1 bundle");

    first.revalidation.expect("a background refresh").await.unwrap();

    let second = handled(gw.handle(&GatewayRequest::get(&url)).await.unwrap());
    assert_eq!(second.response.body_text(), "v2 bundle");
  }

  #[tokio::test]
  async fn tasks_endpoint_served_from_cache_while_offline() {
    // Nothing listens on port 9; the revalidation quietly fails.
    let url = "http://127.0.0.1:9/api/tasks";
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store
      .put_cached(CACHE_API, &cache_key(url), &cached(r#"[{"id":"1","text":"x"}]"#))
      .unwrap();

    let result = handled(gateway(&store).handle(&GatewayRequest::get(url)).await.unwrap());
    assert_eq!(result.source, ResponseSource::Cache);
    let tasks: serde_json::Value = serde_json::from_slice(&result.response.body).unwrap();
    assert_eq!(tasks, json!([{"id": "1", "text": "x"}]));
  }

  #[tokio::test]
  async fn navigation_falls_back_to_offline_page() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store
      .put_cached(CACHE_PRECACHE, &cache_key("/offline.html"), &cached("<h1>offline</h1>"))
      .unwrap();

    let result = handled(
      gateway(&store)
        .handle(&GatewayRequest::navigation("http://127.0.0.1:9/dashboard"))
        .await
        .unwrap(),
    );
    assert_eq!(result.source, ResponseSource::OfflineFallback);
    assert_eq!(result.response.body_text(), "<h1>offline</h1>");
  }

  #[tokio::test]
  async fn navigation_prefers_its_own_cached_copy() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let url = "http://127.0.0.1:9/dashboard";
    store.put_cached(CACHE_RUNTIME, &cache_key(url), &cached("cached page")).unwrap();

    let result = handled(gateway(&store).handle(&GatewayRequest::navigation(url)).await.unwrap());
    assert_eq!(result.source, ResponseSource::Cache);
    assert_eq!(result.response.body_text(), "cached page");
  }

  #[tokio::test]
  async fn user_api_reads_are_never_cached() {
    let server = MockServer::start_async().await;
    let settings = server
      .mock_async(|when, then| {
        when.method(GET).path("/api/user/settings");
        then.status(200).body(r#"{"theme":"dark"}"#);
      })
      .await;

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let gw = gateway(&store);
    let url = server.url("/api/user/settings");

    let result = handled(gw.handle(&GatewayRequest::get(&url)).await.unwrap());
    assert_eq!(result.source, ResponseSource::Network);

    // Second call goes to the network again: nothing was cached.
    handled(gw.handle(&GatewayRequest::get(&url)).await.unwrap());
    assert_eq!(settings.hits_async().await, 2);
  }

  #[tokio::test]
  async fn non_get_is_not_intercepted() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let outcome = gateway(&store)
      .handle(&GatewayRequest::new("POST", "/api/tasks"))
      .await
      .unwrap();
    assert!(matches!(outcome, GatewayOutcome::Passthrough));
  }

  #[tokio::test]
  async fn install_seeds_precache_and_activate_purges_old_partitions() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/offline.html");
        then.status(200).body("<h1>offline</h1>");
      })
      .await;

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store.put_cached("runtime-v1", "old", &cached("from a previous deploy")).unwrap();

    let gw = gateway(&store);
    gw.install(&[server.url("/offline.html")]).await;
    gw.activate().unwrap();

    let seeded: Option<CachedResponse> =
      store.get_cached(CACHE_PRECACHE, &cache_key("/offline.html")).unwrap();
    assert!(seeded.is_some());

    let old: Option<CachedResponse> = store.get_cached("runtime-v1", "old").unwrap();
    assert!(old.is_none());
  }
}
