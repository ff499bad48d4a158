//! The response cache worker.
//!
//! The worker runs as its own task and shares no mutable state with the host
//! application: the host sends `WorkerCommand`s over a channel and watches the
//! worker's lifecycle state. Intercepted fetches are each handled on their own
//! task, so requests for different keys never wait on each other.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::generation::Release;
use super::layer::CacheLayer;
use super::traits::{CacheError, CacheStorage, InstallError};
use crate::http::{Fetch, FetchError, Request, Response};

/// Lifecycle of one worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Uninstalled,
  Installing,
  /// Installed and waiting to be activated
  Installed,
  Activating,
  /// Intercepting requests
  Active,
  /// Failed to install, or replaced/stopped
  Redundant,
}

/// Messages from the host to the worker.
pub enum WorkerCommand {
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<Response, FetchError>>,
  },
  Install {
    reply: oneshot::Sender<Result<(), InstallError>>,
  },
  /// Mark an already installed release as installed without refetching.
  Resume {
    reply: oneshot::Sender<Result<bool, CacheError>>,
  },
  Activate {
    reply: oneshot::Sender<Result<Vec<String>, CacheError>>,
  },
}

struct Worker<S: CacheStorage> {
  layer: Arc<CacheLayer<S>>,
  state: watch::Sender<WorkerState>,
}

impl<S: CacheStorage + 'static> Worker<S> {
  fn current(&self) -> WorkerState {
    *self.state.borrow()
  }

  fn transition(&self, next: WorkerState) {
    debug!(release = %self.layer.release().label(), from = ?self.current(), to = ?next, "worker state");
    self.state.send_replace(next);
  }

  async fn run(self, mut commands: mpsc::Receiver<WorkerCommand>) {
    while let Some(command) = commands.recv().await {
      match command {
        WorkerCommand::Fetch { request, reply } => {
          let layer = Arc::clone(&self.layer);
          let intercepting = self.current() == WorkerState::Active;
          tokio::spawn(async move {
            let result = if intercepting {
              layer.handle(request).await
            } else {
              layer.passthrough(request).await
            };
            // Ignore send errors - the caller may have gone away
            let _ = reply.send(result);
          });
        }
        WorkerCommand::Install { reply } => {
          let _ = reply.send(self.install().await);
        }
        WorkerCommand::Resume { reply } => {
          let _ = reply.send(self.resume().await);
        }
        WorkerCommand::Activate { reply } => {
          let _ = reply.send(self.activate().await);
        }
      }
    }

    self.transition(WorkerState::Redundant);
  }

  async fn install(&self) -> Result<(), InstallError> {
    let state = self.current();
    if state != WorkerState::Uninstalled {
      return Err(CacheError::InvalidTransition {
        action: "install",
        state,
      }
      .into());
    }

    self.transition(WorkerState::Installing);
    match self.layer.install().await {
      Ok(()) => {
        self.transition(WorkerState::Installed);
        Ok(())
      }
      Err(e) => {
        warn!(release = %self.layer.release().label(), error = %e, "installation failed");
        self.transition(WorkerState::Redundant);
        Err(e)
      }
    }
  }

  async fn resume(&self) -> Result<bool, CacheError> {
    if self.current() != WorkerState::Uninstalled {
      return Ok(false);
    }
    let installed = self.layer.is_installed().await?;
    if installed {
      self.transition(WorkerState::Installed);
    }
    Ok(installed)
  }

  async fn activate(&self) -> Result<Vec<String>, CacheError> {
    let state = self.current();
    match state {
      WorkerState::Installed => {
        self.transition(WorkerState::Activating);
        match self.layer.activate().await {
          Ok(purged) => {
            self.transition(WorkerState::Active);
            info!(release = %self.layer.release().label(), "activated");
            Ok(purged)
          }
          Err(e) => {
            self.transition(WorkerState::Installed);
            Err(e)
          }
        }
      }
      // Re-running the cleanup is harmless
      WorkerState::Active => self.layer.activate().await,
      state => Err(CacheError::InvalidTransition {
        action: "activate",
        state,
      }),
    }
  }
}

/// Host-side handle to a running worker.
///
/// Cheap to clone; the worker stops once every handle is dropped.
#[derive(Clone)]
pub struct WorkerHandle {
  commands: mpsc::Sender<WorkerCommand>,
  state: watch::Receiver<WorkerState>,
  release: Release,
}

impl WorkerHandle {
  /// Spawn a worker for the layer's release, starting `Uninstalled`.
  pub fn spawn<S: CacheStorage + 'static>(layer: CacheLayer<S>) -> Self {
    let release = layer.release().clone();
    let (commands, rx) = mpsc::channel(64);
    let (state_tx, state) = watch::channel(WorkerState::Uninstalled);

    let worker = Worker {
      layer: Arc::new(layer),
      state: state_tx,
    };
    tokio::spawn(worker.run(rx));

    Self {
      commands,
      state,
      release,
    }
  }

  pub fn state(&self) -> WorkerState {
    *self.state.borrow()
  }

  pub fn release(&self) -> &Release {
    &self.release
  }

  async fn call<T>(
    &self,
    command: impl FnOnce(oneshot::Sender<T>) -> WorkerCommand,
  ) -> Result<T, CacheError> {
    let (reply, rx) = oneshot::channel();
    self
      .commands
      .send(command(reply))
      .await
      .map_err(|_| CacheError::WorkerGone)?;
    rx.await.map_err(|_| CacheError::WorkerGone)
  }

  pub async fn install(&self) -> Result<(), InstallError> {
    self
      .call(|reply| WorkerCommand::Install { reply })
      .await?
  }

  /// Returns `false` if the release still needs a full install.
  pub async fn resume(&self) -> Result<bool, CacheError> {
    self.call(|reply| WorkerCommand::Resume { reply }).await?
  }

  /// Activate the worker, returning the purged cache names.
  pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
    self.call(|reply| WorkerCommand::Activate { reply }).await?
  }

  /// Wait until the worker reports `Active`.
  pub async fn wait_until_active(&self) -> Result<(), CacheError> {
    let mut state = self.state.clone();
    let reached = *state
      .wait_for(|s| matches!(s, WorkerState::Active | WorkerState::Redundant))
      .await
      .map_err(|_| CacheError::WorkerGone)?;

    if reached == WorkerState::Redundant {
      return Err(CacheError::InvalidTransition {
        action: "wait for",
        state: reached,
      });
    }
    Ok(())
  }
}

impl Fetch for WorkerHandle {
  fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response, FetchError>> {
    let commands = self.commands.clone();
    Box::pin(async move {
      let (reply, rx) = oneshot::channel();
      commands
        .send(WorkerCommand::Fetch { request, reply })
        .await
        .map_err(|_| FetchError::Unavailable("worker stopped".to_string()))?;
      rx.await
        .map_err(|_| FetchError::Unavailable("worker dropped the request".to_string()))?
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::layer::tests::{release, ORIGIN};
  use crate::cache::storage::SqliteStorage;
  use crate::http::mock::MockTransport;
  use crate::http::ResponseSource;
  use url::Url;

  fn spawn(network: &Arc<MockTransport>, storage: Arc<SqliteStorage>) -> WorkerHandle {
    let layer = CacheLayer::new(
      storage,
      network.clone(),
      release("v1", "v1", &["/", "/index.html"]),
      "abc.supabase.co",
      Url::parse(ORIGIN).unwrap(),
    );
    WorkerHandle::spawn(layer)
  }

  fn routed_network() -> Arc<MockTransport> {
    let network = MockTransport::new();
    network.route("http://localhost:5173/", Response::new(200, "<html>root</html>"));
    network.route("http://localhost:5173/index.html", Response::new(200, "<html>index</html>"));
    network
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[tokio::test]
  async fn test_lifecycle_install_then_activate() {
    let network = routed_network();
    let worker = spawn(&network, Arc::new(SqliteStorage::open_in_memory().unwrap()));
    assert_eq!(worker.state(), WorkerState::Uninstalled);

    worker.install().await.unwrap();
    assert_eq!(worker.state(), WorkerState::Installed);

    worker.activate().await.unwrap();
    assert_eq!(worker.state(), WorkerState::Active);
    worker.wait_until_active().await.unwrap();
  }

  #[tokio::test]
  async fn test_failed_install_makes_worker_redundant() {
    let network = MockTransport::new();
    let worker = spawn(&network, Arc::new(SqliteStorage::open_in_memory().unwrap()));

    assert!(worker.install().await.is_err());
    assert_eq!(worker.state(), WorkerState::Redundant);
    assert!(worker.wait_until_active().await.is_err());
  }

  #[tokio::test]
  async fn test_activate_before_install_is_rejected() {
    let network = routed_network();
    let worker = spawn(&network, Arc::new(SqliteStorage::open_in_memory().unwrap()));

    let err = worker.activate().await.unwrap_err();
    assert!(matches!(
      err,
      CacheError::InvalidTransition {
        state: WorkerState::Uninstalled,
        ..
      }
    ));
  }

  #[tokio::test]
  async fn test_requests_bypass_cache_until_active() {
    let network = routed_network();
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let worker = spawn(&network, storage.clone());
    network.route("http://localhost:5173/logo.png", Response::new(200, "png"));

    worker.fetch(get("http://localhost:5173/logo.png")).await.unwrap();
    assert!(!storage.has_cache("songbook-poc-cache-v1").unwrap());

    worker.install().await.unwrap();
    worker.activate().await.unwrap();
    worker.fetch(get("http://localhost:5173/logo.png")).await.unwrap();
    assert_eq!(storage.keys("songbook-poc-cache-v1").unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_manifest_document_served_while_offline() {
    let network = routed_network();
    let worker = spawn(&network, Arc::new(SqliteStorage::open_in_memory().unwrap()));
    worker.install().await.unwrap();
    worker.activate().await.unwrap();

    network.set_online(false);
    let response = worker.fetch(get("http://localhost:5173/")).await.unwrap();

    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.text(), "<html>root</html>");
  }

  #[tokio::test]
  async fn test_resume_skips_network_for_installed_release() {
    let network = routed_network();
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let first = spawn(&network, storage.clone());
    first.install().await.unwrap();
    drop(first);

    network.reset_calls();
    let second = spawn(&network, storage);
    assert!(second.resume().await.unwrap());
    assert_eq!(second.state(), WorkerState::Installed);
    assert_eq!(network.calls(), 0);
  }

  #[tokio::test]
  async fn test_concurrent_fetches_are_all_answered() {
    let network = routed_network();
    let worker = spawn(&network, Arc::new(SqliteStorage::open_in_memory().unwrap()));
    worker.install().await.unwrap();
    worker.activate().await.unwrap();

    let fetches = (0..16).map(|i| {
      let worker = worker.clone();
      let url = if i % 2 == 0 {
        "http://localhost:5173/"
      } else {
        "http://localhost:5173/index.html"
      };
      async move { worker.fetch(get(url)).await }
    });
    let responses = futures::future::join_all(fetches).await;

    assert!(responses.iter().all(|r| r.as_ref().is_ok_and(|r| r.status == 200)));
  }
}
