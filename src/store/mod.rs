//! Structured local store for songs and song payloads.
//!
//! Reads never touch the network. The database is opened lazily on first use
//! and the open handle is shared by every later call; concurrent first uses
//! wait on the same open.

mod types;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::db::{schema, Database};

pub use types::{Song, SongData, StoreCounts, WriteOutcome};

#[derive(Debug, Error)]
pub enum StoreError {
  /// The store could not be opened or upgraded
  #[error("failed to initialize song store: {0}")]
  Init(String),

  #[error("song store query failed: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to encode song payload: {0}")]
  Encode(#[from] serde_json::Error),

  #[error("song store lock poisoned")]
  Poisoned,

  #[error("song store task failed: {0}")]
  Join(String),
}

#[derive(Debug, Clone)]
enum Location {
  File(PathBuf),
  Memory,
}

/// Handle to the song store. Create one at startup and share it.
pub struct SongStore {
  location: Location,
  db: OnceCell<Arc<Mutex<Database>>>,
}

impl SongStore {
  pub fn new(path: PathBuf) -> Self {
    Self {
      location: Location::File(path),
      db: OnceCell::new(),
    }
  }

  /// A store living only as long as this handle.
  pub fn in_memory() -> Self {
    Self {
      location: Location::Memory,
      db: OnceCell::new(),
    }
  }

  /// Default database file inside `data_dir`.
  pub fn path_in(data_dir: &Path) -> PathBuf {
    data_dir.join(format!("{}.db", schema::DB_NAME))
  }

  async fn database(&self) -> Result<Arc<Mutex<Database>>, StoreError> {
    let db = self
      .db
      .get_or_try_init(|| async {
        let location = self.location.clone();
        let database = tokio::task::spawn_blocking(move || match &location {
          Location::File(path) => Database::open(path),
          Location::Memory => Database::open_in_memory(),
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))??;

        info!(location = ?self.location, "opened song store");
        Ok::<_, StoreError>(Arc::new(Mutex::new(database)))
      })
      .await?;

    Ok(Arc::clone(db))
  }

  /// Run `f` against the database on the blocking pool. The mutex serializes
  /// writers, so `clear` never interleaves with a `put`.
  async fn with_db<T, F>(&self, f: F) -> Result<T, StoreError>
  where
    T: Send + 'static,
    F: FnOnce(&mut Database) -> Result<T, StoreError> + Send + 'static,
  {
    let db = self.database().await?;
    tokio::task::spawn_blocking(move || {
      let mut guard = db.lock().map_err(|_| StoreError::Poisoned)?;
      f(&mut guard)
    })
    .await
    .map_err(|e| StoreError::Join(e.to_string()))?
  }

  /// Insert or fully replace the song at `song.id`.
  ///
  /// A record older than the stored one is not written.
  pub async fn put_song(&self, song: Song) -> Result<WriteOutcome, StoreError> {
    let id = song.id;
    let outcome = self
      .with_db(move |db| {
        let changed = db.conn().execute(
          "INSERT INTO songs (id, name, artist, last_updated) VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             artist = excluded.artist,
             last_updated = excluded.last_updated
           WHERE excluded.last_updated >= songs.last_updated",
          params![song.id, song.name, song.artist, song.last_updated],
        )?;
        Ok(outcome_of(changed))
      })
      .await?;

    debug!(id, ?outcome, "put song");
    Ok(outcome)
  }

  /// Insert or replace the payload for `id`, stamped with the current time.
  pub async fn put_song_data(
    &self,
    id: i64,
    data: serde_json::Value,
  ) -> Result<WriteOutcome, StoreError> {
    self
      .upsert_song_data(SongData {
        id,
        data,
        last_updated: Utc::now().timestamp_millis(),
      })
      .await
  }

  async fn upsert_song_data(&self, record: SongData) -> Result<WriteOutcome, StoreError> {
    let id = record.id;
    let data = serde_json::to_string(&record.data)?;
    let outcome = self
      .with_db(move |db| {
        let changed = db.conn().execute(
          "INSERT INTO song_data (id, data, last_updated) VALUES (?1, ?2, ?3)
           ON CONFLICT(id) DO UPDATE SET
             data = excluded.data,
             last_updated = excluded.last_updated
           WHERE excluded.last_updated >= song_data.last_updated",
          params![record.id, data, record.last_updated],
        )?;
        Ok(outcome_of(changed))
      })
      .await?;

    debug!(id, ?outcome, "put song data");
    Ok(outcome)
  }

  pub async fn get_song(&self, id: i64) -> Result<Option<Song>, StoreError> {
    self
      .with_db(move |db| {
        let song = db
          .conn()
          .query_row(
            "SELECT id, name, artist, last_updated FROM songs WHERE id = ?",
            params![id],
            |row| {
              Ok(Song {
                id: row.get(0)?,
                name: row.get(1)?,
                artist: row.get(2)?,
                last_updated: row.get(3)?,
              })
            },
          )
          .optional()?;
        Ok(song)
      })
      .await
  }

  pub async fn get_song_data(&self, id: i64) -> Result<Option<SongData>, StoreError> {
    self
      .with_db(move |db| {
        let row: Option<(i64, String, i64)> = db
          .conn()
          .query_row(
            "SELECT id, data, last_updated FROM song_data WHERE id = ?",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
          )
          .optional()?;

        row
          .map(|(id, data, last_updated)| {
            Ok(SongData {
              id,
              data: serde_json::from_str(&data)?,
              last_updated,
            })
          })
          .transpose()
      })
      .await
  }

  /// Every stored song, in no particular order.
  pub async fn get_all_songs(&self) -> Result<Vec<Song>, StoreError> {
    self
      .with_db(|db| {
        let mut stmt = db
          .conn()
          .prepare("SELECT id, name, artist, last_updated FROM songs")?;
        let songs = stmt
          .query_map([], |row| {
            Ok(Song {
              id: row.get(0)?,
              name: row.get(1)?,
              artist: row.get(2)?,
              last_updated: row.get(3)?,
            })
          })?
          .collect::<Result<Vec<_>, _>>()?;
        Ok(songs)
      })
      .await
  }

  /// Empty both collections in one transaction: either both end up cleared
  /// or neither does.
  pub async fn clear(&self) -> Result<(), StoreError> {
    self
      .with_db(|db| {
        let tx = db.conn_mut().transaction()?;
        tx.execute("DELETE FROM songs", [])?;
        tx.execute("DELETE FROM song_data", [])?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    info!("cleared song store");
    Ok(())
  }

  pub async fn counts(&self) -> Result<StoreCounts, StoreError> {
    self
      .with_db(|db| {
        let count = |table: &str| -> Result<usize, StoreError> {
          let n: i64 = db
            .conn()
            .query_row(&format!("SELECT count(*) FROM {}", table), [], |row| {
              row.get(0)
            })?;
          Ok(n as usize)
        };
        Ok(StoreCounts {
          songs: count("songs")?,
          song_data: count("song_data")?,
        })
      })
      .await
  }
}

fn outcome_of(changed: usize) -> WriteOutcome {
  if changed > 0 {
    WriteOutcome::Applied
  } else {
    WriteOutcome::Stale
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn song(id: i64, name: &str, last_updated: i64) -> Song {
    Song {
      id,
      name: name.to_string(),
      artist: "X".to_string(),
      last_updated,
    }
  }

  #[tokio::test]
  async fn test_last_write_wins_for_same_id() {
    let store = SongStore::in_memory();

    for (i, name) in ["first", "second", "third"].iter().enumerate() {
      let outcome = store.put_song(song(1, name, 100 + i as i64)).await.unwrap();
      assert_eq!(outcome, WriteOutcome::Applied);
    }
    // Equal timestamp still overwrites
    store.put_song(song(1, "fourth", 102)).await.unwrap();

    let stored = store.get_song(1).await.unwrap().unwrap();
    assert_eq!(stored.name, "fourth");
    assert_eq!(store.get_all_songs().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_older_song_write_is_rejected() {
    let store = SongStore::in_memory();
    store.put_song(song(1, "new", 200)).await.unwrap();

    let outcome = store.put_song(song(1, "old", 100)).await.unwrap();

    assert_eq!(outcome, WriteOutcome::Stale);
    let stored = store.get_song(1).await.unwrap().unwrap();
    assert_eq!(stored.name, "new");
    assert_eq!(stored.last_updated, 200);
  }

  #[tokio::test]
  async fn test_older_song_data_write_is_rejected() {
    let store = SongStore::in_memory();
    store
      .upsert_song_data(SongData {
        id: 5,
        data: json!({"v": 2}),
        last_updated: 200,
      })
      .await
      .unwrap();

    let outcome = store
      .upsert_song_data(SongData {
        id: 5,
        data: json!({"v": 1}),
        last_updated: 100,
      })
      .await
      .unwrap();

    assert_eq!(outcome, WriteOutcome::Stale);
    assert_eq!(store.get_song_data(5).await.unwrap().unwrap().data, json!({"v": 2}));
  }

  #[tokio::test]
  async fn test_put_song_data_stamps_now() {
    let store = SongStore::in_memory();
    let before = Utc::now().timestamp_millis();

    store
      .put_song_data(7, json!({"lyrics": ["la", "la"], "key": "G"}))
      .await
      .unwrap();
    let after = Utc::now().timestamp_millis();

    let stored = store.get_song_data(7).await.unwrap().unwrap();
    assert_eq!(stored.data["key"], "G");
    assert!(stored.last_updated >= before && stored.last_updated <= after);
  }

  #[tokio::test]
  async fn test_missing_records_are_none() {
    let store = SongStore::in_memory();
    store.put_song(song(1, "A", 1)).await.unwrap();

    assert!(store.get_song(2).await.unwrap().is_none());
    assert!(store.get_song_data(1).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_clear_empties_both_collections() {
    let store = SongStore::in_memory();
    store.put_song(song(1, "A", 1)).await.unwrap();
    store.put_song_data(1, json!({"chords": "C G Am F"})).await.unwrap();

    store.clear().await.unwrap();

    assert!(store.get_all_songs().await.unwrap().is_empty());
    assert!(store.get_song(1).await.unwrap().is_none());
    assert!(store.get_song_data(1).await.unwrap().is_none());
    assert_eq!(store.counts().await.unwrap(), StoreCounts::default());
  }

  #[tokio::test]
  async fn test_failed_clear_leaves_both_collections_intact() {
    let store = SongStore::in_memory();
    store.put_song(song(1, "A", 1)).await.unwrap();
    store
      .with_db(|db| {
        // Make the second delete fail
        db.conn()
          .execute_batch("CREATE TRIGGER block_clear BEFORE DELETE ON song_data BEGIN SELECT RAISE(ABORT, 'blocked'); END;")?;
        Ok(())
      })
      .await
      .unwrap();
    store.put_song_data(1, json!({})).await.unwrap();

    assert!(store.clear().await.is_err());

    assert_eq!(store.get_all_songs().await.unwrap().len(), 1);
    assert!(store.get_song_data(1).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_concurrent_first_use_shares_one_database() {
    // Each in-memory open is a separate database, so any duplicate open
    // would lose writes
    let store = Arc::new(SongStore::in_memory());

    let writes = (1..=8).map(|id| {
      let store = Arc::clone(&store);
      tokio::spawn(async move { store.put_song(song(id, "A", 1)).await })
    });
    for handle in futures::future::join_all(writes).await {
      handle.unwrap().unwrap();
    }

    assert_eq!(store.get_all_songs().await.unwrap().len(), 8);
  }

  #[tokio::test]
  async fn test_store_persists_across_handles() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = SongStore::path_in(dir.path());

    {
      let store = SongStore::new(path.clone());
      store.put_song(song(3, "Persisted", 10)).await.unwrap();
    }

    let store = SongStore::new(path);
    assert_eq!(store.get_song(3).await.unwrap().unwrap().name, "Persisted");
  }

  #[tokio::test]
  async fn test_open_failure_is_init_error() {
    let dir = tempfile::TempDir::new().unwrap();
    // A directory where the database file should be
    let path = dir.path().join("songbook-poc.db");
    std::fs::create_dir_all(&path).unwrap();

    let store = SongStore::new(path);
    let err = store.get_all_songs().await.unwrap_err();
    assert!(matches!(err, StoreError::Init(_)));
  }
}
