//! Song store schema.
//!
//! `MIGRATIONS[n]` upgrades the database from version `n` to `n + 1`; the
//! persisted version lives in `PRAGMA user_version`.

/// Logical database name, also used for the file name.
pub const DB_NAME: &str = "songbook-poc";

pub const MIGRATIONS: &[&str] = &[
  // 1: song metadata and song payloads, both keyed by the remote id
  r#"
CREATE TABLE IF NOT EXISTS songs (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    artist TEXT NOT NULL,
    last_updated INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS song_data (
    id INTEGER PRIMARY KEY,
    data TEXT NOT NULL,
    last_updated INTEGER NOT NULL
);
"#,
];

pub fn schema_version() -> u32 {
  MIGRATIONS.len() as u32
}
