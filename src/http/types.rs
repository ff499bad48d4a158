//! Request and response snapshots passed between callers, the response cache
//! and the network.

use futures::future::BoxFuture;
use reqwest::Method;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// An outbound request as seen by the response cache.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      headers: Vec::new(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Request identity used as the cache key: method + URL.
  ///
  /// Hashed for stable, fixed-length keys.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Classification of a response, following the fetch standard's response types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response with readable body
  Cors,
  /// Cross-origin response without readable body
  Opaque,
  /// Network-level error response
  Error,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseType::Basic => "basic",
      ResponseType::Cors => "cors",
      ResponseType::Opaque => "opaque",
      ResponseType::Error => "error",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(ResponseType::Basic),
      "cors" => Some(ResponseType::Cors),
      "opaque" => Some(ResponseType::Opaque),
      "error" => Some(ResponseType::Error),
      _ => None,
    }
  }
}

/// Where a response handed back to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live network response
  Network,
  /// Served from the static asset generation without touching the network
  Cache,
  /// Network unavailable, served from the remote-data generation
  Offline,
}

/// A fully buffered response snapshot.
#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub response_type: ResponseType,
  /// Whether the final URL differs from the requested one
  pub redirected: bool,
  pub source: ResponseSource,
}

impl Response {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Successful, same-origin and not redirected.
  pub fn is_cacheable_asset(&self) -> bool {
    self.is_success() && self.response_type == ResponseType::Basic && !self.redirected
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
    serde_json::from_slice(&self.body)
  }
}

/// Canned responses for tests.
#[cfg(test)]
impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
      response_type: ResponseType::Basic,
      redirected: false,
      source: ResponseSource::Network,
    }
  }

  pub fn with_type(mut self, response_type: ResponseType) -> Self {
    self.response_type = response_type;
    self
  }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  /// Transport-level failure, including timeouts
  #[error("network error: {0}")]
  Network(String),

  /// Network unavailable and nothing cached for this request
  #[error("no data available offline for {0}")]
  NoDataAvailable(String),

  /// The response cache worker is no longer running
  #[error("response cache unavailable: {0}")]
  Unavailable(String),
}

/// Anything that can answer a request: the network itself, or the response
/// cache sitting in front of it.
pub trait Fetch: Send + Sync {
  fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response, FetchError>>;
}
