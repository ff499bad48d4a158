use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;
use url::Url;

use super::api_types::{ApiErrorBody, RemoteSong};
use crate::http::{Fetch, FetchError, Request};

/// A remote call did not produce data. Never partial.
#[derive(Debug, Error)]
pub enum RemoteError {
  #[error("network error: {0}")]
  Network(String),

  /// Offline and nothing cached for the call
  #[error("no data available offline for {0}")]
  NoData(String),

  #[error("remote returned {status}: {message}")]
  Status { status: u16, message: String },

  #[error("failed to decode remote response: {0}")]
  Decode(String),
}

impl From<FetchError> for RemoteError {
  fn from(e: FetchError) -> Self {
    match e {
      FetchError::Network(msg) | FetchError::Unavailable(msg) => RemoteError::Network(msg),
      FetchError::NoDataAvailable(url) => RemoteError::NoData(url),
    }
  }
}

/// Typed client for the songbook RPCs.
///
/// Requests go through whatever `Fetch` it is given; in the running app that
/// is the response cache, so gateway traffic is intercepted like any other.
#[derive(Clone)]
pub struct SongGateway {
  fetch: Arc<dyn Fetch>,
  base: Url,
  api_key: String,
}

impl SongGateway {
  pub fn new(fetch: Arc<dyn Fetch>, remote_url: &str, api_key: impl Into<String>) -> Result<Self> {
    let base =
      Url::parse(remote_url).map_err(|e| eyre!("Invalid remote URL '{}': {}", remote_url, e))?;
    if base.host_str().is_none() {
      return Err(eyre!("Remote URL '{}' has no host", remote_url));
    }

    Ok(Self {
      fetch,
      base,
      api_key: api_key.into(),
    })
  }

  pub fn host(&self) -> &str {
    self.base.host_str().unwrap_or_default()
  }

  /// Build the GET request for an RPC. Parameters go in the query string so
  /// the request identity (method + URL) is stable and cacheable.
  pub fn rpc_request(&self, function: &str, args: &[(&str, String)]) -> Request {
    let mut url = self.base.clone();
    url.set_path(&format!("/rest/v1/rpc/{}", function));
    url.set_query(None);
    if !args.is_empty() {
      url
        .query_pairs_mut()
        .extend_pairs(args.iter().map(|(k, v)| (*k, v.as_str())));
    }

    Request::get(url)
      .with_header("apikey", self.api_key.clone())
      .with_header("Authorization", format!("Bearer {}", self.api_key))
      .with_header("Accept", "application/json")
  }

  /// Fetch every song.
  pub async fn get_songs(&self) -> Result<Vec<RemoteSong>, RemoteError> {
    self
      .call(self.rpc_request("get_songs", &[]))
      .await
      .inspect_err(|e| error!(error = %e, "Error fetching songs"))
  }

  /// Fetch the opaque payload of one song.
  pub async fn get_song_data(&self, song_id: i64) -> Result<serde_json::Value, RemoteError> {
    self
      .call(self.rpc_request("get_song_data", &[("song_id", song_id.to_string())]))
      .await
      .inspect_err(|e| error!(song_id, error = %e, "Error fetching song data"))
  }

  async fn call<T: DeserializeOwned>(&self, request: Request) -> Result<T, RemoteError> {
    let response = self.fetch.fetch(request).await?;

    if !response.is_success() {
      let message = response
        .json::<ApiErrorBody>()
        .map(|body| body.describe())
        .unwrap_or_else(|_| response.text());
      return Err(RemoteError::Status {
        status: response.status,
        message,
      });
    }

    response
      .json()
      .map_err(|e| RemoteError::Decode(e.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::mock::MockTransport;
  use crate::http::Response;
  use serde_json::json;

  const API: &str = "https://abc.supabase.co";

  fn gateway(network: &Arc<MockTransport>) -> SongGateway {
    SongGateway::new(network.clone(), API, "anon-key").unwrap()
  }

  #[test]
  fn test_rpc_request_shape() {
    let network = MockTransport::new();
    let request = gateway(&network).rpc_request("get_song_data", &[("song_id", "42".into())]);

    assert_eq!(
      request.url.as_str(),
      "https://abc.supabase.co/rest/v1/rpc/get_song_data?song_id=42"
    );
    assert!(request
      .headers
      .contains(&("apikey".to_string(), "anon-key".to_string())));
    assert!(request
      .headers
      .contains(&("Authorization".to_string(), "Bearer anon-key".to_string())));
  }

  #[test]
  fn test_invalid_remote_url_is_rejected() {
    let network = MockTransport::new();
    assert!(SongGateway::new(network.clone(), "not a url", "k").is_err());
    assert!(SongGateway::new(network, "data:text/plain,hi", "k").is_err());
  }

  #[tokio::test]
  async fn test_get_songs_decodes_rows() {
    let network = MockTransport::new();
    network.route(
      "https://abc.supabase.co/rest/v1/rpc/get_songs",
      Response::new(200, r#"[{"id":1,"name":"A","artist":"X"}]"#),
    );

    let songs = gateway(&network).get_songs().await.unwrap();
    assert_eq!(
      songs,
      vec![RemoteSong {
        id: 1,
        name: "A".into(),
        artist: "X".into()
      }]
    );
  }

  #[tokio::test]
  async fn test_get_song_data_returns_opaque_payload() {
    let network = MockTransport::new();
    network.route(
      "https://abc.supabase.co/rest/v1/rpc/get_song_data?song_id=3",
      Response::new(200, r#"{"verses":[["C","G"]],"capo":2}"#),
    );

    let data = gateway(&network).get_song_data(3).await.unwrap();
    assert_eq!(data, json!({"verses": [["C", "G"]], "capo": 2}));
  }

  #[tokio::test]
  async fn test_server_error_message_is_surfaced() {
    let network = MockTransport::new();
    network.route(
      "https://abc.supabase.co/rest/v1/rpc/get_songs",
      Response::new(400, r#"{"message":"function missing","hint":"check name"}"#),
    );

    let err = gateway(&network).get_songs().await.unwrap_err();
    match err {
      RemoteError::Status { status, message } => {
        assert_eq!(status, 400);
        assert_eq!(message, "function missing (check name)");
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_transport_failure_is_network_error() {
    let network = MockTransport::new();
    network.set_online(false);

    let err = gateway(&network).get_songs().await.unwrap_err();
    assert!(matches!(err, RemoteError::Network(_)));
  }

  #[tokio::test]
  async fn test_malformed_body_is_decode_error() {
    let network = MockTransport::new();
    network.route(
      "https://abc.supabase.co/rest/v1/rpc/get_songs",
      Response::new(200, r#"{"not":"a list"}"#),
    );

    let err = gateway(&network).get_songs().await.unwrap_err();
    assert!(matches!(err, RemoteError::Decode(_)));
  }
}
