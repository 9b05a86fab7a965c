//! Thin HTTP client for the remote REST collaborator.

use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use tracing::warn;
use url::Url;

use crate::error::{Result, SyncError};
use crate::store::{Entity, OperationKind, QueuedOperation};

/// Map a non-success HTTP status onto the retriable/non-retriable taxonomy.
pub fn classify_status(status: StatusCode) -> SyncError {
  if status.is_client_error() {
    SyncError::ClientRejected {
      status: status.as_u16(),
    }
  } else {
    SyncError::ServerTransient {
      status: status.as_u16(),
    }
  }
}

/// HTTP client wrapper used by both the sync engine and the write path.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  bearer_token: Option<String>,
}

impl ApiClient {
  pub fn new(base_url: &str, bearer_token: Option<String>) -> Result<Self> {
    let base_url = Url::parse(base_url)
      .map_err(|e| SyncError::InvalidConfig(format!("invalid base url {base_url:?}: {e}")))?;
    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| SyncError::InvalidConfig(format!("build http client: {e}")))?;

    Ok(Self {
      http,
      base_url,
      bearer_token,
    })
  }

  /// Fetch the authoritative entity collection (the mirror-refresh target).
  pub async fn fetch_entities(&self, path: &str) -> Result<Vec<Entity>> {
    let mut req = self.http.get(self.resolve(path)?);
    if let Some(token) = &self.bearer_token {
      req = req.bearer_auth(token);
    }

    let res = req.send().await?;
    let status = res.status();
    if !status.is_success() {
      return Err(classify_status(status));
    }

    Ok(res.json::<Vec<Entity>>().await?)
  }

  /// Replay one queued operation exactly as captured at enqueue time.
  /// Returns the HTTP status; transport failure is `NetworkUnreachable`.
  pub async fn execute(&self, op: &QueuedOperation) -> Result<StatusCode> {
    self.send(&op.target_url, &op.kind, &op.extra_headers).await
  }

  /// Build and send a mutation request from its parts.
  pub async fn send(
    &self,
    target_url: &str,
    kind: &OperationKind,
    extra_headers: &BTreeMap<String, String>,
  ) -> Result<StatusCode> {
    let url = self.resolve(target_url)?;
    let method = match kind {
      OperationKind::Create(_) => Method::POST,
      OperationKind::Update(_) => Method::PUT,
      OperationKind::Delete => Method::DELETE,
    };

    let mut req = self
      .http
      .request(method, url)
      .headers(build_headers(extra_headers));

    let has_auth = extra_headers.keys().any(|k| k.eq_ignore_ascii_case("authorization"));
    if let (Some(token), false) = (&self.bearer_token, has_auth) {
      req = req.bearer_auth(token);
    }

    if let Some(body) = kind.body() {
      req = req.body(serde_json::to_vec(body)?);
    }

    let res = req.send().await?;
    Ok(res.status())
  }

  /// Reachability probe: any HTTP response counts as online.
  pub async fn probe(&self) -> bool {
    self.http.get(self.base_url.clone()).send().await.is_ok()
  }

  fn resolve(&self, target: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(target) {
      return Ok(url);
    }
    self
      .base_url
      .join(target)
      .map_err(|e| SyncError::InvalidConfig(format!("invalid target url {target:?}: {e}")))
  }
}

/// Replay headers default to JSON content-type; captured headers override.
fn build_headers(extra: &BTreeMap<String, String>) -> HeaderMap {
  let mut headers = HeaderMap::new();
  headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

  for (name, value) in extra {
    match (
      HeaderName::from_bytes(name.as_bytes()),
      HeaderValue::from_str(value),
    ) {
      (Ok(name), Ok(value)) => {
        headers.insert(name, value);
      }
      _ => warn!(header = %name, "skipping invalid replay header"),
    }
  }

  headers
}

#[cfg(test)]
mod tests {
  use super::*;
  use httpmock::prelude::*;
  use serde_json::json;

  #[tokio::test]
  async fn replays_captured_headers_and_body() {
    let server = MockServer::start_async().await;
    let mock = server
      .mock_async(|when, then| {
        when
          .method(POST)
          .path("/api/tasks")
          .header("authorization", "Bearer queued-tok")
          .header("content-type", "application/json")
          .json_body(json!({"text": "x"}));
        then.status(201);
      })
      .await;

    let api = ApiClient::new(&server.base_url(), Some("live-tok".to_string())).unwrap();
    let mut headers = BTreeMap::new();
    headers.insert("Authorization".to_string(), "Bearer queued-tok".to_string());

    let status = api
      .send("/api/tasks", &OperationKind::Create(json!({"text": "x"})), &headers)
      .await
      .unwrap();

    assert_eq!(status, StatusCode::CREATED);
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn fetch_entities_classifies_failures() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/api/tasks");
        then.status(503);
      })
      .await;

    let api = ApiClient::new(&server.base_url(), None).unwrap();
    let err = api.fetch_entities("/api/tasks").await.unwrap_err();
    assert!(matches!(err, SyncError::ServerTransient { status: 503 }));
  }

  #[tokio::test]
  async fn transport_failure_is_network_unreachable() {
    // Port 9 (discard) is not listening.
    let api = ApiClient::new("http://127.0.0.1:9", None).unwrap();
    let err = api
      .send("/api/tasks", &OperationKind::Delete, &BTreeMap::new())
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::NetworkUnreachable(_)));
    assert!(err.is_retriable());
  }
}
