//! SQLite implementation of the response cache storage.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheError, CacheStorage};
use crate::http::{Request, Response, ResponseSource, ResponseType};

/// SQLite-based response cache storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self, CacheError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| CacheError::Open(format!("failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      CacheError::Open(format!(
        "failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self, CacheError> {
    let conn = Connection::open_in_memory().map_err(|e| CacheError::Open(e.to_string()))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self, CacheError> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| CacheError::Open(format!("failed to run cache migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
    self.conn.lock().map_err(|_| CacheError::Poisoned)
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named caches (one per generation)
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    response_type TEXT NOT NULL,
    redirected INTEGER NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_key)
);

-- Worker lifecycle markers (active / waiting release)
CREATE TABLE IF NOT EXISTS worker_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

fn insert_entry(
  conn: &Connection,
  name: &str,
  request: &Request,
  response: &Response,
) -> Result<(), CacheError> {
  let headers =
    serde_json::to_string(&response.headers).map_err(|e| CacheError::Corrupt(e.to_string()))?;

  conn.execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![name])?;
  conn.execute(
    "INSERT OR REPLACE INTO cache_entries
       (cache_name, request_key, method, url, status, headers, body, response_type, redirected, cached_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
    params![
      name,
      request.cache_key(),
      request.method.as_str(),
      request.url.as_str(),
      response.status,
      headers,
      response.body,
      response.response_type.as_str(),
      response.redirected,
    ],
  )?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open_cache(&self, name: &str) -> Result<(), CacheError> {
    let conn = self.lock()?;
    conn.execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![name])?;
    Ok(())
  }

  fn has_cache(&self, name: &str) -> Result<bool, CacheError> {
    let conn = self.lock()?;
    let found: Option<i64> = conn
      .query_row("SELECT 1 FROM caches WHERE name = ?", params![name], |row| row.get(0))
      .optional()?;
    Ok(found.is_some())
  }

  fn cache_names(&self) -> Result<Vec<String>, CacheError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM caches ORDER BY created_at, name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
  }

  fn delete_cache(&self, name: &str) -> Result<bool, CacheError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM cache_entries WHERE cache_name = ?", params![name])?;
    let removed = tx.execute("DELETE FROM caches WHERE name = ?", params![name])?;
    tx.commit()?;
    Ok(removed > 0)
  }

  fn put(&self, name: &str, request: &Request, response: &Response) -> Result<(), CacheError> {
    let conn = self.lock()?;
    insert_entry(&conn, name, request, response)
  }

  fn put_all(&self, name: &str, entries: &[(Request, Response)]) -> Result<(), CacheError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![name])?;
    for (request, response) in entries {
      insert_entry(&tx, name, request, response)?;
    }
    tx.commit()?;
    Ok(())
  }

  fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>, CacheError> {
    let conn = self.lock()?;

    let row: Option<(u16, String, Vec<u8>, String, bool)> = conn
      .query_row(
        "SELECT status, headers, body, response_type, redirected
         FROM cache_entries WHERE cache_name = ? AND request_key = ?",
        params![name, request.cache_key()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()?;

    let Some((status, headers, body, response_type, redirected)) = row else {
      return Ok(None);
    };

    let headers: Vec<(String, String)> =
      serde_json::from_str(&headers).map_err(|e| CacheError::Corrupt(e.to_string()))?;
    let response_type = ResponseType::parse(&response_type)
      .ok_or_else(|| CacheError::Corrupt(format!("unknown response type '{}'", response_type)))?;

    Ok(Some(Response {
      status,
      headers,
      body,
      response_type,
      redirected,
      source: ResponseSource::Cache,
    }))
  }

  fn keys(&self, name: &str) -> Result<Vec<String>, CacheError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT url FROM cache_entries WHERE cache_name = ? ORDER BY url")?;
    let urls = stmt
      .query_map(params![name], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(urls)
  }

  fn get_meta(&self, key: &str) -> Result<Option<String>, CacheError> {
    let conn = self.lock()?;
    let value = conn
      .query_row(
        "SELECT value FROM worker_meta WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set_meta(&self, key: &str, value: Option<&str>) -> Result<(), CacheError> {
    let conn = self.lock()?;
    match value {
      Some(value) => conn.execute(
        "INSERT OR REPLACE INTO worker_meta (key, value) VALUES (?, ?)",
        params![key, value],
      )?,
      None => conn.execute("DELETE FROM worker_meta WHERE key = ?", params![key])?,
    };
    Ok(())
  }
}
