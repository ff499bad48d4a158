//! In-process network double for tests.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::types::{Fetch, FetchError, Request, Response};

/// Serves canned responses keyed by URL, counts calls and can go offline.
///
/// Unknown URLs answer 404.
pub struct MockTransport {
  routes: Mutex<HashMap<String, Response>>,
  online: AtomicBool,
  calls: AtomicUsize,
}

impl MockTransport {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      routes: Mutex::new(HashMap::new()),
      online: AtomicBool::new(true),
      calls: AtomicUsize::new(0),
    })
  }

  pub fn route(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// Number of fetches attempted, including ones that failed while offline.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn reset_calls(&self) {
    self.calls.store(0, Ordering::SeqCst);
  }
}

impl Fetch for MockTransport {
  fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response, FetchError>> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    let result = if !self.online.load(Ordering::SeqCst) {
      Err(FetchError::Network("connection refused".to_string()))
    } else {
      let routes = self.routes.lock().unwrap();
      Ok(
        routes
          .get(request.url.as_str())
          .cloned()
          .unwrap_or_else(|| Response::new(404, "not found")),
      )
    };

    Box::pin(futures::future::ready(result))
  }
}
