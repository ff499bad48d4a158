//! Core traits and types for the response cache.

use thiserror::Error;

use super::worker::WorkerState;
use crate::http::{FetchError, Request, Response};

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache storage error: {0}")]
  Storage(#[from] rusqlite::Error),

  #[error("failed to open response cache: {0}")]
  Open(String),

  #[error("corrupt cache entry: {0}")]
  Corrupt(String),

  #[error("cache storage lock poisoned")]
  Poisoned,

  #[error("cache task failed: {0}")]
  Join(String),

  #[error("cannot {action} a worker in state {state:?}")]
  InvalidTransition {
    action: &'static str,
    state: WorkerState,
  },

  #[error("response cache worker stopped")]
  WorkerGone,
}

/// An asset listed in the manifest could not be cached; the installation is
/// aborted and nothing is written.
#[derive(Debug, Error)]
pub enum InstallError {
  #[error("invalid manifest path {path}: {reason}")]
  InvalidPath { path: String, reason: String },

  #[error("failed to fetch manifest asset {url}: {source}")]
  Fetch { url: String, source: FetchError },

  #[error("manifest asset {url} returned status {status}")]
  Status { url: String, status: u16 },

  #[error(transparent)]
  Cache(#[from] CacheError),
}

/// Persistent storage for named caches of request/response pairs.
///
/// Mirrors the platform cache storage: caches are opened by name, entries
/// are keyed by request identity, and each put is atomic per key.
pub trait CacheStorage: Send + Sync {
  /// Create the named cache if it doesn't exist.
  fn open_cache(&self, name: &str) -> Result<(), CacheError>;

  fn has_cache(&self, name: &str) -> Result<bool, CacheError>;

  fn cache_names(&self) -> Result<Vec<String>, CacheError>;

  /// Delete a cache and all its entries. Returns whether it existed.
  fn delete_cache(&self, name: &str) -> Result<bool, CacheError>;

  /// Store a response, replacing any entry for the same request.
  fn put(&self, name: &str, request: &Request, response: &Response) -> Result<(), CacheError>;

  /// Store several responses in one transaction: all of them or none.
  fn put_all(&self, name: &str, entries: &[(Request, Response)]) -> Result<(), CacheError>;

  /// The stored response for `request`, marked as served from cache.
  fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>, CacheError>;

  /// URLs of every entry in the named cache.
  fn keys(&self, name: &str) -> Result<Vec<String>, CacheError>;

  fn get_meta(&self, key: &str) -> Result<Option<String>, CacheError>;

  /// Set (or with `None`, remove) a metadata value.
  fn set_meta(&self, key: &str, value: Option<&str>) -> Result<(), CacheError>;
}
