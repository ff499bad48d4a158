//! Registration, updates and warm-up of the response cache.
//!
//! The active and waiting releases are remembered in the cache database, so
//! an update deferred in one run is activated on the next load.

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use url::Url;

use crate::cache::{
  blocking, CacheError, CacheLayer, CacheStorage, InstallError, Release, WorkerHandle,
  WorkerState,
};
use crate::http::{Fetch, FetchError, Request, Response};

const ACTIVE_KEY: &str = "active_release";
const WAITING_KEY: &str = "waiting_release";

/// Notifications for the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
  /// A new release is installed and waiting; the host decides when to reload
  UpdateAvailable { active: String, waiting: String },
  /// The cache is populated and the app can be used offline
  OfflineReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateChoice {
  ReloadNow,
  /// Keep the current release until the next load
  Defer,
}

/// Outcome of an update check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
  /// First install; nothing was active before
  Installed,
  UpToDate,
  /// A new release is installed and waiting
  Waiting,
  /// A release deferred earlier was activated
  Activated,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
  #[error(transparent)]
  Install(#[from] InstallError),

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error("corrupt release record: {0}")]
  Record(#[from] serde_json::Error),

  #[error("no response cache is active")]
  NotRegistered,

  #[error("no update is waiting")]
  NoUpdateWaiting,

  #[error("warm-up request returned status {0}")]
  WarmUp(u16),
}

pub struct LifecycleSettings {
  pub release: Release,
  /// Requests to this host are remote-data requests
  pub api_host: String,
  pub origin: Url,
  /// Representative remote-data request used to prime the cache
  pub warm_up: Request,
}

/// Owns the response cache workers and decides which one is active.
///
/// Also the app's `Fetch`: requests go to the active worker, or straight to
/// the network when none is active.
pub struct CacheLifecycle<S: CacheStorage> {
  storage: Arc<S>,
  network: Arc<dyn Fetch>,
  settings: LifecycleSettings,
  active: RwLock<Option<WorkerHandle>>,
  waiting: Mutex<Option<WorkerHandle>>,
  events: mpsc::UnboundedSender<LifecycleEvent>,
  update_lock: tokio::sync::Mutex<()>,
}

impl<S: CacheStorage + 'static> CacheLifecycle<S> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<dyn Fetch>,
    settings: LifecycleSettings,
  ) -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
    let (events, rx) = mpsc::unbounded_channel();
    let lifecycle = Self {
      storage,
      network,
      settings,
      active: RwLock::new(None),
      waiting: Mutex::new(None),
      events,
      update_lock: tokio::sync::Mutex::new(()),
    };
    (lifecycle, rx)
  }

  pub fn release(&self) -> &Release {
    &self.settings.release
  }

  fn active_handle(&self) -> Option<WorkerHandle> {
    self
      .active
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  fn set_active(&self, worker: WorkerHandle) {
    *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(worker);
  }

  fn waiting_handle(&self) -> Option<WorkerHandle> {
    self
      .waiting
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  fn emit(&self, event: LifecycleEvent) {
    // The host may not listen
    let _ = self.events.send(event);
  }

  /// State of the worker currently serving requests.
  pub fn state(&self) -> WorkerState {
    self
      .active_handle()
      .map(|worker| worker.state())
      .unwrap_or(WorkerState::Uninstalled)
  }

  pub fn active_release(&self) -> Option<Release> {
    self.active_handle().map(|worker| worker.release().clone())
  }

  pub fn waiting_release(&self) -> Option<Release> {
    self.waiting_handle().map(|worker| worker.release().clone())
  }

  fn spawn_worker(&self, release: Release) -> WorkerHandle {
    let layer = CacheLayer::new(
      Arc::clone(&self.storage),
      Arc::clone(&self.network),
      release,
      self.settings.api_host.clone(),
      self.settings.origin.clone(),
    );
    WorkerHandle::spawn(layer)
  }

  /// Spawn a worker for `release`, installing only if its caches are gone.
  async fn install_worker(&self, release: Release) -> Result<WorkerHandle, LifecycleError> {
    let worker = self.spawn_worker(release);
    if !worker.resume().await? {
      worker.install().await?;
    }
    Ok(worker)
  }

  async fn start_worker(&self, release: Release) -> Result<WorkerHandle, LifecycleError> {
    let worker = self.install_worker(release).await?;
    worker.activate().await?;
    Ok(worker)
  }

  /// Make `worker` the active one and forget any waiting release.
  async fn promote(&self, worker: WorkerHandle) -> Result<(), LifecycleError> {
    self.write_record(ACTIVE_KEY, Some(worker.release())).await?;
    self.write_record(WAITING_KEY, None).await?;
    self.set_active(worker);
    *self.waiting.lock().unwrap_or_else(PoisonError::into_inner) = None;
    Ok(())
  }

  async fn read_record(&self, key: &'static str) -> Result<Option<Release>, LifecycleError> {
    let raw = blocking(&self.storage, move |storage| storage.get_meta(key)).await?;
    Ok(raw.map(|json| serde_json::from_str(&json)).transpose()?)
  }

  async fn write_record(
    &self,
    key: &'static str,
    release: Option<&Release>,
  ) -> Result<(), LifecycleError> {
    let raw = release.map(serde_json::to_string).transpose()?;
    blocking(&self.storage, move |storage| storage.set_meta(key, raw.as_deref())).await?;
    Ok(())
  }

  /// Register the response cache at startup.
  pub async fn register(&self) -> Result<UpdateStatus, LifecycleError> {
    self.update().await
  }

  /// Bring the workers in line with the configured release.
  ///
  /// A new release is installed next to the active one and waits; the
  /// previous release keeps serving until the host applies the update. If
  /// the new release fails to install, the previous one stays active.
  pub async fn update(&self) -> Result<UpdateStatus, LifecycleError> {
    let _guard = self.update_lock.lock().await;
    let current = self.settings.release.clone();

    if self
      .active_handle()
      .is_some_and(|worker| worker.release().same_generations(&current))
    {
      return Ok(UpdateStatus::UpToDate);
    }
    if self
      .waiting_handle()
      .is_some_and(|worker| worker.release().same_generations(&current))
    {
      return Ok(UpdateStatus::Waiting);
    }

    let active = self.read_record(ACTIVE_KEY).await?;
    let waiting = self.read_record(WAITING_KEY).await?;

    match active {
      None => {
        let worker = self.start_worker(current).await?;
        self.promote(worker).await?;
        info!(release = %self.release().label(), "response cache installed");
        self.emit(LifecycleEvent::OfflineReady);
        Ok(UpdateStatus::Installed)
      }
      Some(active) if active.same_generations(&current) => {
        // A manifest edit is installed into the current generations in place
        let edited = active != current;
        let worker = self.start_worker(current).await?;
        if edited || waiting.is_some() {
          self.promote(worker).await?;
        } else {
          self.set_active(worker);
        }
        if edited {
          info!(release = %self.release().label(), "manifest updated in place");
        }
        Ok(UpdateStatus::UpToDate)
      }
      Some(_)
        if waiting
          .as_ref()
          .is_some_and(|waiting| waiting.same_generations(&current)) =>
      {
        // Deferred last time: this load is the "next load"
        let worker = self.start_worker(current).await?;
        self.promote(worker).await?;
        info!(release = %self.release().label(), "deferred update activated");
        self.emit(LifecycleEvent::OfflineReady);
        Ok(UpdateStatus::Activated)
      }
      Some(active) => {
        if self.active_handle().is_none() {
          match self.start_worker(active.clone()).await {
            Ok(worker) => self.set_active(worker),
            Err(e) => warn!(release = %active.label(), error = %e, "could not resume previous release"),
          }
        }

        let candidate = self.install_worker(current.clone()).await?;
        self.write_record(WAITING_KEY, Some(&current)).await?;
        *self.waiting.lock().unwrap_or_else(PoisonError::into_inner) = Some(candidate);

        info!(active = %active.label(), waiting = %current.label(), "update available");
        self.emit(LifecycleEvent::UpdateAvailable {
          active: active.label(),
          waiting: current.label(),
        });
        Ok(UpdateStatus::Waiting)
      }
    }
  }

  /// Act on the host's answer to `UpdateAvailable`.
  pub async fn apply_update(&self, choice: UpdateChoice) -> Result<(), LifecycleError> {
    let _guard = self.update_lock.lock().await;
    let Some(waiting) = self.waiting_handle() else {
      return Err(LifecycleError::NoUpdateWaiting);
    };

    match choice {
      UpdateChoice::ReloadNow => {
        waiting.activate().await?;
        self.promote(waiting).await?;
        info!(release = %self.release().label(), "update applied");
      }
      UpdateChoice::Defer => {
        info!(release = %waiting.release().label(), "update deferred until next load");
      }
    }
    Ok(())
  }

  pub async fn wait_until_active(&self) -> Result<(), LifecycleError> {
    let worker = self.active_handle().ok_or(LifecycleError::NotRegistered)?;
    worker.wait_until_active().await?;
    Ok(())
  }

  /// Force an update check, wait for an active worker, then fetch one
  /// remote-data request so it is cached before going offline.
  ///
  /// Failures are logged and reported as `false`.
  pub async fn warm_up(&self) -> bool {
    match self.try_warm_up().await {
      Ok(()) => {
        info!("warm-up complete");
        true
      }
      Err(e) => {
        error!(error = %e, "Error warming up app");
        false
      }
    }
  }

  async fn try_warm_up(&self) -> Result<(), LifecycleError> {
    self.update().await?;
    self.wait_until_active().await?;

    let response = self.fetch(self.settings.warm_up.clone()).await?;
    if !response.is_success() {
      return Err(LifecycleError::WarmUp(response.status));
    }
    Ok(())
  }

  /// Every cache with its entry count.
  pub async fn cache_summary(&self) -> Result<Vec<(String, usize)>, LifecycleError> {
    let summary = blocking(&self.storage, |storage| {
      storage
        .cache_names()?
        .into_iter()
        .map(|name| {
          let count = storage.keys(&name)?.len();
          Ok((name, count))
        })
        .collect::<Result<Vec<_>, CacheError>>()
    })
    .await?;
    Ok(summary)
  }
}

impl<S: CacheStorage + 'static> Fetch for CacheLifecycle<S> {
  fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response, FetchError>> {
    match self.active_handle() {
      Some(worker) => worker.fetch(request),
      None => self.network.fetch(request),
    }
  }
}
