use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

use crate::cache::{Generation, Release, SqliteStorage};
use crate::config::Config;
use crate::http::{Fetch, HttpTransport, Request};
use crate::library::Library;
use crate::lifecycle::{
  CacheLifecycle, LifecycleEvent, LifecycleSettings, UpdateChoice, UpdateStatus,
};
use crate::remote::SongGateway;
use crate::store::SongStore;
use crate::Command;

const RESPONSE_CACHE_FILE: &str = "response-cache.db";

/// How to answer "New content available. Reload?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
  Ask,
  ReloadNow,
  Defer,
}

/// Where the app keeps its databases; `None` keeps everything in memory.
pub struct Options {
  pub data_dir: Option<PathBuf>,
  pub update_policy: UpdatePolicy,
}

/// The host application: wires the response cache, gateway and song store
/// together and runs one command against them.
pub struct App {
  lifecycle: Arc<CacheLifecycle<SqliteStorage>>,
  events: mpsc::UnboundedReceiver<LifecycleEvent>,
  library: Library,
  origin: Url,
  policy: UpdatePolicy,
}

impl App {
  pub fn new(config: &Config, options: Options) -> Result<Self> {
    let origin = Url::parse(&config.app.origin)
      .map_err(|e| eyre!("Invalid app origin '{}': {}", config.app.origin, e))?;

    let (storage, store) = match &options.data_dir {
      Some(dir) => {
        std::fs::create_dir_all(dir)
          .map_err(|e| eyre!("Failed to create data directory {}: {}", dir.display(), e))?;
        (
          SqliteStorage::open(&dir.join(RESPONSE_CACHE_FILE))?,
          SongStore::new(SongStore::path_in(dir)),
        )
      }
      None => (SqliteStorage::open_in_memory()?, SongStore::in_memory()),
    };

    let network: Arc<dyn Fetch> = Arc::new(HttpTransport::new(
      origin.clone(),
      config.cache.request_timeout(),
    )?);
    let api_key = Config::get_api_key()?;

    // The warm-up request is built by a gateway that talks to the network
    // directly; only its shape matters here.
    let probe = SongGateway::new(Arc::clone(&network), &config.remote.url, api_key.clone())?;
    let settings = LifecycleSettings {
      release: release_from(config),
      api_host: probe.host().to_string(),
      origin: origin.clone(),
      warm_up: probe.rpc_request(&config.cache.warm_up_rpc, &[]),
    };

    let (lifecycle, events) = CacheLifecycle::new(Arc::new(storage), network, settings);
    let lifecycle = Arc::new(lifecycle);

    // Gateway traffic goes through the response cache like any other request
    let gateway = SongGateway::new(lifecycle.clone(), &config.remote.url, api_key)?;
    let library = Library::new(Arc::new(store), gateway);

    Ok(Self {
      lifecycle,
      events,
      library,
      origin,
      policy: options.update_policy,
    })
  }

  pub async fn run(&mut self, command: Command) -> Result<()> {
    match command {
      Command::WarmUp => {
        let ready = self.lifecycle.warm_up().await;
        self.handle_events().await?;
        if !ready {
          return Err(eyre!("Warm-up failed; see the log for details"));
        }
        println!("Warm-up complete");
      }
      Command::Songs { refresh } => {
        self.register().await?;
        let songs = if refresh {
          self.library.refresh_songs().await?
        } else {
          self.library.songs().await?
        };
        for song in songs {
          println!("{:>5}  {} - {}", song.id, song.name, song.artist);
        }
      }
      Command::Song { id } => {
        self.register().await?;
        let song = self.library.song(id).await?;
        let data = self.library.song_data(id).await?;
        println!("{} - {}", song.name, song.artist);
        println!("{}", serde_json::to_string_pretty(&data.data)?);
      }
      Command::Fetch { url } => {
        self.register().await?;
        let url = self
          .origin
          .join(&url)
          .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
        let response = self.lifecycle.fetch(Request::get(url)).await?;
        println!("{} ({:?})", response.status, response.source);
        println!("{}", response.text());
      }
      Command::Reset => {
        self.library.reset().await?;
        println!("Local song store cleared");
      }
      Command::Status => {
        self.register().await?;
        self.print_status().await?;
      }
    }
    Ok(())
  }

  /// Register the response cache. Failure leaves the app usable online, so
  /// it is reported and not propagated.
  async fn register(&mut self) -> Result<()> {
    match self.lifecycle.register().await {
      Ok(UpdateStatus::UpToDate) => {}
      Ok(status) => info!(?status, "response cache registered"),
      Err(e) => {
        warn!(error = %e, "response cache registration failed");
        eprintln!("Offline support unavailable: {}", e);
      }
    }
    self.handle_events().await
  }

  async fn handle_events(&mut self) -> Result<()> {
    while let Ok(event) = self.events.try_recv() {
      match event {
        LifecycleEvent::OfflineReady => println!("App ready to work offline"),
        LifecycleEvent::UpdateAvailable { active, waiting } => {
          info!(%active, %waiting, "asking about update");
          let choice = self.update_choice().await?;
          self.lifecycle.apply_update(choice).await?;
          if choice == UpdateChoice::ReloadNow {
            println!("Reloaded with {}", waiting);
          }
        }
      }
    }
    Ok(())
  }

  async fn update_choice(&self) -> Result<UpdateChoice> {
    match self.policy {
      UpdatePolicy::ReloadNow => Ok(UpdateChoice::ReloadNow),
      UpdatePolicy::Defer => Ok(UpdateChoice::Defer),
      UpdatePolicy::Ask => {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(b"New content available. Reload? [y/N] ").await?;
        stdout.flush().await?;

        let mut answer = String::new();
        BufReader::new(tokio::io::stdin())
          .read_line(&mut answer)
          .await?;

        Ok(parse_answer(&answer))
      }
    }
  }

  async fn print_status(&self) -> Result<()> {
    let label = |release: Option<Release>| {
      release
        .map(|r| r.label())
        .unwrap_or_else(|| "none".to_string())
    };
    println!("Worker:  {:?}", self.lifecycle.state());
    println!("Active:  {}", label(self.lifecycle.active_release()));
    println!("Waiting: {}", label(self.lifecycle.waiting_release()));

    println!("Caches:");
    for (name, entries) in self.lifecycle.cache_summary().await? {
      println!("  {:<28} {} entries", name, entries);
    }

    let counts = self.library.counts().await?;
    println!("Songs:   {} ({} with data)", counts.songs, counts.song_data);
    Ok(())
  }
}

fn release_from(config: &Config) -> Release {
  let cache = &config.cache;
  Release {
    static_assets: Generation::new(&cache.static_prefix, &cache.static_version),
    remote_data: Generation::new(&cache.data_prefix, &cache.data_version),
    manifest: cache.manifest.clone(),
  }
}

fn parse_answer(answer: &str) -> UpdateChoice {
  match answer.trim().to_lowercase().as_str() {
    "y" | "yes" => UpdateChoice::ReloadNow,
    _ => UpdateChoice::Defer,
  }
}
