//! Song library backed by the local store, filled from the remote gateway.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::remote::{RemoteError, SongGateway};
use crate::store::{Song, SongData, SongStore, StoreCounts, StoreError};

#[derive(Debug, Error)]
pub enum LibraryError {
  #[error(transparent)]
  Remote(#[from] RemoteError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("song {0} not found")]
  NotFound(i64),
}

/// Reads are served from the store when it has the record; otherwise the
/// gateway is asked and the result is persisted before returning.
#[derive(Clone)]
pub struct Library {
  store: Arc<SongStore>,
  gateway: SongGateway,
}

impl Library {
  pub fn new(store: Arc<SongStore>, gateway: SongGateway) -> Self {
    Self { store, gateway }
  }

  /// All songs sorted by name, fetched from the remote only when the store
  /// is empty.
  pub async fn songs(&self) -> Result<Vec<Song>, LibraryError> {
    let mut songs = self.store.get_all_songs().await?;
    if songs.is_empty() {
      debug!("song store empty, fetching from remote");
      return self.refresh_songs().await;
    }

    sort_songs(&mut songs);
    Ok(songs)
  }

  /// Fetch every song from the remote and persist it.
  pub async fn refresh_songs(&self) -> Result<Vec<Song>, LibraryError> {
    let remote = self.gateway.get_songs().await?;
    let now = Utc::now().timestamp_millis();

    for song in remote {
      self.store.put_song(song.into_song(now)).await?;
    }
    info!("refreshed songs from remote");

    let mut songs = self.store.get_all_songs().await?;
    sort_songs(&mut songs);
    Ok(songs)
  }

  pub async fn song(&self, id: i64) -> Result<Song, LibraryError> {
    if let Some(song) = self.store.get_song(id).await? {
      return Ok(song);
    }

    self.refresh_songs().await?;
    self
      .store
      .get_song(id)
      .await?
      .ok_or(LibraryError::NotFound(id))
  }

  pub async fn song_data(&self, id: i64) -> Result<SongData, LibraryError> {
    if let Some(data) = self.store.get_song_data(id).await? {
      return Ok(data);
    }

    let payload = self.gateway.get_song_data(id).await?;
    self.store.put_song_data(id, payload).await?;
    self
      .store
      .get_song_data(id)
      .await?
      .ok_or(LibraryError::NotFound(id))
  }

  pub async fn reset(&self) -> Result<(), LibraryError> {
    self.store.clear().await?;
    Ok(())
  }

  pub async fn counts(&self) -> Result<StoreCounts, LibraryError> {
    Ok(self.store.counts().await?)
  }
}

fn sort_songs(songs: &mut [Song]) {
  songs.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::mock::MockTransport;
  use crate::http::Response;
  use serde_json::json;

  const SONGS_URL: &str = "https://abc.supabase.co/rest/v1/rpc/get_songs";

  fn library(network: &Arc<MockTransport>) -> (Library, Arc<SongStore>) {
    let store = Arc::new(SongStore::in_memory());
    let gateway = SongGateway::new(network.clone(), "https://abc.supabase.co", "key").unwrap();
    (Library::new(store.clone(), gateway), store)
  }

  #[tokio::test]
  async fn test_fetched_songs_land_in_store() {
    let network = MockTransport::new();
    network.route(SONGS_URL, Response::new(200, r#"[{"id":1,"name":"A","artist":"X"}]"#));
    let (library, store) = library(&network);

    let songs = library.songs().await.unwrap();
    assert_eq!(songs.len(), 1);

    let all = store.get_all_songs().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "A");
    assert_eq!(all[0].artist, "X");
    assert!(store.get_song(1).await.unwrap().is_some());
    assert!(store.get_song(2).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_songs_served_from_store_without_network() {
    let network = MockTransport::new();
    network.route(
      SONGS_URL,
      Response::new(200, r#"[{"id":2,"name":"B","artist":"Y"},{"id":1,"name":"A","artist":"X"}]"#),
    );
    let (library, _) = library(&network);
    library.songs().await.unwrap();

    network.set_online(false);
    network.reset_calls();
    let songs = library.songs().await.unwrap();

    assert_eq!(network.calls(), 0);
    let names: Vec<_> = songs.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);
  }

  #[tokio::test]
  async fn test_song_data_fetched_once_then_local() {
    let network = MockTransport::new();
    network.route(
      "https://abc.supabase.co/rest/v1/rpc/get_song_data?song_id=4",
      Response::new(200, r#"{"chords":"Am F C G"}"#),
    );
    let (library, _) = library(&network);

    let first = library.song_data(4).await.unwrap();
    assert_eq!(first.data, json!({"chords": "Am F C G"}));

    network.set_online(false);
    let second = library.song_data(4).await.unwrap();
    assert_eq!(second, first);
  }

  #[tokio::test]
  async fn test_unknown_song_is_not_found() {
    let network = MockTransport::new();
    network.route(SONGS_URL, Response::new(200, r#"[{"id":1,"name":"A","artist":"X"}]"#));
    let (library, _) = library(&network);

    assert!(matches!(library.song(9).await, Err(LibraryError::NotFound(9))));
  }

  #[tokio::test]
  async fn test_offline_empty_store_propagates_remote_error() {
    let network = MockTransport::new();
    network.set_online(false);
    let (library, _) = library(&network);

    assert!(matches!(library.songs().await, Err(LibraryError::Remote(_))));
  }

  #[tokio::test]
  async fn test_reset_clears_store() {
    let network = MockTransport::new();
    network.route(SONGS_URL, Response::new(200, r#"[{"id":1,"name":"A","artist":"X"}]"#));
    let (library, store) = library(&network);
    library.songs().await.unwrap();

    library.reset().await.unwrap();

    assert!(store.get_all_songs().await.unwrap().is_empty());
    assert_eq!(library.counts().await.unwrap(), StoreCounts::default());
  }
}
