//! Serde-deserializable types matching the remote API responses.
//!
//! These are separate from the store types: the server never sends
//! `lastUpdated`, the caller stamps it when persisting.

use serde::Deserialize;

use crate::store::Song;

/// One row of the `get_songs` RPC.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteSong {
  pub id: i64,
  pub name: String,
  pub artist: String,
}

impl RemoteSong {
  pub fn into_song(self, last_updated: i64) -> Song {
    Song {
      id: self.id,
      name: self.name,
      artist: self.artist,
      last_updated,
    }
  }
}

/// PostgREST error body.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
  pub message: String,
  #[serde(default)]
  pub hint: Option<String>,
}

impl ApiErrorBody {
  pub fn describe(&self) -> String {
    match &self.hint {
      Some(hint) => format!("{} ({})", self.message, hint),
      None => self.message.clone(),
    }
  }
}
