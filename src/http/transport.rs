use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::time::Duration;
use url::Url;

use super::types::{Fetch, FetchError, Request, Response, ResponseSource, ResponseType};

/// Network transport backed by reqwest.
///
/// Every call is bounded by the configured timeout; a timeout surfaces as a
/// `FetchError::Network` so the response cache falls back exactly as it does
/// for any other transport failure.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  /// Origin of the application, used to tell basic from cors responses
  origin: Url,
}

impl HttpTransport {
  pub fn new(origin: Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }

  async fn send(client: reqwest::Client, origin: Url, request: Request) -> Result<Response, FetchError> {
    let mut builder = client.request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| FetchError::Network(e.to_string()))?;

    let final_url = response.url().clone();
    let redirected = final_url != request.url;
    let response_type = if final_url.origin() == origin.origin() {
      ResponseType::Basic
    } else {
      ResponseType::Cors
    };
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::Network(e.to_string()))?;

    Ok(Response {
      status,
      headers,
      body: body.to_vec(),
      response_type,
      redirected,
      source: ResponseSource::Network,
    })
  }
}

impl Fetch for HttpTransport {
  fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response, FetchError>> {
    let client = self.client.clone();
    let origin = self.origin.clone();
    Box::pin(Self::send(client, origin, request))
  }
}
