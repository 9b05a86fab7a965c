//! Request classification for the caching gateway. First match wins.

use url::Url;

/// An inbound read-style request as seen by the gateway.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
  pub method: String,
  pub url: String,
  /// Full-page load rather than a subresource fetch.
  pub navigation: bool,
}

impl GatewayRequest {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.into(),
      navigation: false,
    }
  }

  pub fn navigation(url: impl Into<String>) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.into(),
      navigation: true,
    }
  }

  pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
    Self {
      method: method.into(),
      url: url.into(),
      navigation: false,
    }
  }

  /// Path component, host- and query-agnostic (single-origin app).
  pub fn path(&self) -> String {
    path_of(&self.url)
  }
}

/// Caching policy classes, in routing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Immutable static assets: serve cache, fetch only on miss.
  CacheFirst,
  /// Try network, cache success, fall back to cache / offline page.
  NetworkFirst,
  /// Serve cache immediately, revalidate in the background.
  StaleWhileRevalidate,
  /// Session/user-specific API reads: never cached.
  NetworkOnly,
  /// Non-GET: never intercepted, the caller performs it.
  Passthrough,
}

/// Route a request to its caching policy. `tasks_path` is the one
/// read-mostly API endpoint that is safe to cache.
pub fn classify(req: &GatewayRequest, tasks_path: &str) -> RequestClass {
  if !req.method.eq_ignore_ascii_case("GET") {
    return RequestClass::Passthrough;
  }

  let path = req.path();

  if path == tasks_path {
    return RequestClass::StaleWhileRevalidate;
  }
  // Other API reads carry per-user data; caching would leak it across
  // sessions through shared cache storage.
  if path.starts_with("/api/") {
    return RequestClass::NetworkOnly;
  }
  if req.navigation {
    return RequestClass::NetworkFirst;
  }
  if path.starts_with("/icons/") || path.starts_with("/sfx/") {
    return RequestClass::CacheFirst;
  }

  // Hashed build assets, manifest, and any remaining GET.
  RequestClass::StaleWhileRevalidate
}

pub(super) fn path_of(url: &str) -> String {
  if let Ok(parsed) = Url::parse(url) {
    return parsed.path().to_string();
  }
  url.split('?').next().unwrap_or(url).to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  const TASKS: &str = "/api/tasks";

  #[test]
  fn routing_table() {
    assert_eq!(
      classify(&GatewayRequest::get("/icons/logo.png"), TASKS),
      RequestClass::CacheFirst
    );
    assert_eq!(
      classify(&GatewayRequest::get("/sfx/ALARM.mp3"), TASKS),
      RequestClass::CacheFirst
    );
    assert_eq!(
      classify(&GatewayRequest::navigation("/"), TASKS),
      RequestClass::NetworkFirst
    );
    assert_eq!(
      classify(&GatewayRequest::get("/api/tasks"), TASKS),
      RequestClass::StaleWhileRevalidate
    );
    assert_eq!(
      classify(&GatewayRequest::get("/api/user/settings"), TASKS),
      RequestClass::NetworkOnly
    );
    assert_eq!(
      classify(&GatewayRequest::get("/assets/app.3fa9c2.js"), TASKS),
      RequestClass::StaleWhileRevalidate
    );
    assert_eq!(
      classify(&GatewayRequest::get("/manifest.json"), TASKS),
      RequestClass::StaleWhileRevalidate
    );
    assert_eq!(
      classify(&GatewayRequest::new("POST", "/api/tasks"), TASKS),
      RequestClass::Passthrough
    );
  }

  #[test]
  fn absolute_urls_classify_by_path() {
    assert_eq!(
      classify(&GatewayRequest::get("http://127.0.0.1:4100/api/tasks?view=all"), TASKS),
      RequestClass::StaleWhileRevalidate
    );
    assert_eq!(
      classify(&GatewayRequest::get("http://127.0.0.1:4100/icons/icon-192.png"), TASKS),
      RequestClass::CacheFirst
    );
  }
}
