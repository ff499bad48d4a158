mod app;
mod cache;
mod config;
mod db;
mod http;
mod library;
mod lifecycle;
mod logging;
mod remote;
mod store;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use app::{App, Options, UpdatePolicy};

#[derive(Parser, Debug)]
#[command(name = "songbook")]
#[command(about = "Offline-first songbook reader")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/songbook/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep the song store and response cache in memory for this run only
  #[arg(long)]
  ephemeral: bool,

  /// Apply a waiting update without asking
  #[arg(long, conflicts_with = "defer")]
  yes: bool,

  /// Keep the current release until the next run
  #[arg(long)]
  defer: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Install the response cache and prime it with the song list
  WarmUp,
  /// List songs from the local store
  Songs {
    /// Fetch the list from the remote even if the store has songs
    #[arg(long)]
    refresh: bool,
  },
  /// Show one song and its payload
  Song { id: i64 },
  /// Fetch a URL or app path through the response cache
  Fetch { url: String },
  /// Clear the local song store
  Reset,
  /// Show the cache generations and store counts
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  let data_dir = config.data_dir()?;
  let _log_guard = logging::init(&data_dir.join("logs"))?;

  let update_policy = if args.yes {
    UpdatePolicy::ReloadNow
  } else if args.defer {
    UpdatePolicy::Defer
  } else {
    UpdatePolicy::Ask
  };
  let options = Options {
    data_dir: (!args.ephemeral).then_some(data_dir),
    update_policy,
  };

  let mut app = App::new(&config, options)?;
  app.run(args.command).await?;

  Ok(())
}
