//! Request interception strategies for the response cache.

use futures::future::try_join_all;
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::generation::Release;
use super::traits::{CacheError, CacheStorage, InstallError};
use crate::http::{Fetch, FetchError, Request, Response, ResponseSource};

/// How an intercepted request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Remote API traffic: network first, write back, fall back to cache
  RemoteData,
  /// Everything else: cache first, fill the cache on miss
  StaticAsset,
  /// Not cacheable (non-GET): straight to the network
  Passthrough,
}

/// Cache layer deciding, per request, between cache and network.
///
/// Owns one release's two generations; a stored response is only served when
/// both the request key and the generation match.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  network: Arc<dyn Fetch>,
  release: Release,
  /// Requests to this host are remote-data requests
  api_host: String,
  /// Manifest paths are resolved against the app origin
  origin: Url,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<dyn Fetch>,
    release: Release,
    api_host: impl Into<String>,
    origin: Url,
  ) -> Self {
    Self {
      storage,
      network,
      release,
      api_host: api_host.into(),
      origin,
    }
  }

  pub fn release(&self) -> &Release {
    &self.release
  }

  /// Classify a request; first match wins.
  pub fn classify(&self, request: &Request) -> RequestClass {
    if request.method != Method::GET {
      RequestClass::Passthrough
    } else if request.url.host_str() == Some(self.api_host.as_str()) {
      RequestClass::RemoteData
    } else {
      RequestClass::StaticAsset
    }
  }

  /// Answer an intercepted request.
  pub async fn handle(&self, request: Request) -> Result<Response, FetchError> {
    let class = self.classify(&request);
    debug!(url = %request.url, ?class, "intercepted request");

    match class {
      RequestClass::RemoteData => self.network_first(request).await,
      RequestClass::StaticAsset => self.cache_first(request).await,
      RequestClass::Passthrough => self.passthrough(request).await,
    }
  }

  /// Send a request to the network without touching any cache.
  pub async fn passthrough(&self, request: Request) -> Result<Response, FetchError> {
    self.network.fetch(request).await
  }

  /// Network first with write-back; on a network error (not a failure
  /// status) serve the last stored response for the same request.
  async fn network_first(&self, request: Request) -> Result<Response, FetchError> {
    let cache_name = self.release.data_cache();

    match self.network.fetch(request.clone()).await {
      Ok(response) => {
        if response.is_success() {
          self.write_back(cache_name, &request, &response).await;
        }
        Ok(response)
      }
      Err(FetchError::Network(reason)) => {
        debug!(url = %request.url, %reason, "network failed, falling back to remote-data cache");
        match self.lookup(cache_name, &request).await {
          Some(mut cached) => {
            cached.source = ResponseSource::Offline;
            Ok(cached)
          }
          None => Err(FetchError::NoDataAvailable(request.url.to_string())),
        }
      }
      Err(other) => Err(other),
    }
  }

  /// Cache first; on a miss fetch and keep successful same-origin responses.
  async fn cache_first(&self, request: Request) -> Result<Response, FetchError> {
    let cache_name = self.release.static_cache();

    if let Some(cached) = self.lookup(cache_name.clone(), &request).await {
      return Ok(cached);
    }

    let response = self.network.fetch(request.clone()).await?;
    if response.is_cacheable_asset() {
      self.write_back(cache_name, &request, &response).await;
    }
    Ok(response)
  }

  /// Storage failures on lookup count as a miss.
  async fn lookup(&self, cache_name: String, request: &Request) -> Option<Response> {
    let req = request.clone();
    match self
      .blocking(move |storage| storage.match_request(&cache_name, &req))
      .await
    {
      Ok(found) => found,
      Err(e) => {
        warn!(url = %request.url, error = %e, "cache lookup failed");
        None
      }
    }
  }

  /// Write failures are logged and swallowed; the caller still gets the
  /// live response.
  async fn write_back(&self, cache_name: String, request: &Request, response: &Response) {
    let req = request.clone();
    let resp = response.clone();
    let name = cache_name.clone();

    if let Err(e) = self
      .blocking(move |storage| storage.put(&name, &req, &resp))
      .await
    {
      warn!(url = %request.url, cache = %cache_name, error = %e, "failed to store response");
    }
  }

  /// Pre-populate the static generation with the manifest and make sure the
  /// remote-data generation exists. All-or-nothing: if any asset fails,
  /// nothing is written.
  pub async fn install(&self) -> Result<(), InstallError> {
    let requests = self.manifest_requests()?;

    let entries = try_join_all(requests.into_iter().map(|request| async move {
      let url = request.url.to_string();
      let response = self
        .network
        .fetch(request.clone())
        .await
        .map_err(|source| InstallError::Fetch {
          url: url.clone(),
          source,
        })?;
      if !response.is_success() {
        return Err(InstallError::Status {
          url,
          status: response.status,
        });
      }
      Ok((request, response))
    }))
    .await?;

    let count = entries.len();
    let static_cache = self.release.static_cache();
    let data_cache = self.release.data_cache();
    self
      .blocking(move |storage| {
        storage.put_all(&static_cache, &entries)?;
        storage.open_cache(&data_cache)
      })
      .await?;

    info!(release = %self.release.label(), assets = count, "installed");
    Ok(())
  }

  fn manifest_requests(&self) -> Result<Vec<Request>, InstallError> {
    self
      .release
      .manifest
      .iter()
      .map(|path| {
        self
          .origin
          .join(path)
          .map(Request::get)
          .map_err(|e| InstallError::InvalidPath {
            path: path.clone(),
            reason: e.to_string(),
          })
      })
      .collect()
  }

  /// Whether the static generation already holds every manifest asset.
  pub async fn is_installed(&self) -> Result<bool, CacheError> {
    // A bad path is reported by `install`
    let Ok(requests) = self.manifest_requests() else {
      return Ok(false);
    };
    let urls: Vec<String> = requests.into_iter().map(|r| r.url.to_string()).collect();
    let static_cache = self.release.static_cache();

    self
      .blocking(move |storage| {
        if !storage.has_cache(&static_cache)? {
          return Ok(false);
        }
        let keys = storage.keys(&static_cache)?;
        Ok(urls.iter().all(|url| keys.contains(url)))
      })
      .await
  }

  /// Purge every cache of this release's families left by other versions.
  ///
  /// Idempotent; returns the purged cache names.
  pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
    let release = self.release.clone();
    let purged = self
      .blocking(move |storage| {
        let names = storage.cache_names()?;
        let mut purged = Vec::new();
        for name in release.stale_caches(&names) {
          if storage.delete_cache(name)? {
            purged.push(name.clone());
          }
        }
        storage.open_cache(&release.data_cache())?;
        Ok(purged)
      })
      .await?;

    for name in &purged {
      info!(cache = %name, "purged stale cache generation");
    }
    Ok(purged)
  }

  async fn blocking<T, F>(&self, f: F) -> Result<T, CacheError>
  where
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T, CacheError> + Send + 'static,
  {
    blocking(&self.storage, f).await
  }
}

/// Run a storage call on the blocking pool.
pub(crate) async fn blocking<S, T, F>(storage: &Arc<S>, f: F) -> Result<T, CacheError>
where
  S: CacheStorage + 'static,
  T: Send + 'static,
  F: FnOnce(&S) -> Result<T, CacheError> + Send + 'static,
{
  let storage = Arc::clone(storage);
  tokio::task::spawn_blocking(move || f(&storage))
    .await
    .map_err(|e| CacheError::Join(e.to_string()))?
}
