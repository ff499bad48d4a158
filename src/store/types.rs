use serde::{Deserialize, Serialize};

/// Song metadata as kept in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
  pub id: i64,
  pub name: String,
  pub artist: String,
  /// Milliseconds since epoch
  pub last_updated: i64,
}

/// Opaque song payload; its schema is owned by the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongData {
  pub id: i64,
  pub data: serde_json::Value,
  pub last_updated: i64,
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
  Applied,
  /// The stored record is newer; the write was dropped
  Stale,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
  pub songs: usize,
  pub song_data: usize,
}
