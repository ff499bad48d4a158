pub mod schema;

use rusqlite::Connection;
use std::path::Path;
use tracing::info;

use crate::store::StoreError;

/// Database connection wrapper for the song store
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create the database at `path`
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| StoreError::Init(format!("failed to create database directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      StoreError::Init(format!(
        "failed to open database at {}: {}",
        path.display(),
        e
      ))
    })?;

    let mut db = Self { conn };
    db.run_migrations()?;

    Ok(db)
  }

  pub fn open_in_memory() -> Result<Self, StoreError> {
    let conn = Connection::open_in_memory().map_err(|e| StoreError::Init(e.to_string()))?;
    let mut db = Self { conn };
    db.run_migrations()?;
    Ok(db)
  }

  /// Run every migration above the persisted schema version, once.
  fn run_migrations(&mut self) -> Result<(), StoreError> {
    let persisted = self.schema_version()?;
    let target = schema::schema_version();

    if persisted > target {
      return Err(StoreError::Init(format!(
        "database schema version {} is newer than supported version {}",
        persisted, target
      )));
    }

    for (index, migration) in schema::MIGRATIONS.iter().enumerate() {
      let version = index as u32 + 1;
      if version <= persisted {
        continue;
      }

      let tx = self
        .conn
        .transaction()
        .map_err(|e| StoreError::Init(format!("failed to begin migration: {}", e)))?;
      tx.execute_batch(migration)
        .map_err(|e| StoreError::Init(format!("migration to version {} failed: {}", version, e)))?;
      tx.pragma_update(None, "user_version", version)
        .map_err(|e| StoreError::Init(format!("failed to record schema version: {}", e)))?;
      tx.commit()
        .map_err(|e| StoreError::Init(format!("failed to commit migration: {}", e)))?;

      info!(version, "migrated song store schema");
    }

    Ok(())
  }

  pub fn schema_version(&self) -> Result<u32, StoreError> {
    self
      .conn
      .pragma_query_value(None, "user_version", |row| row.get(0))
      .map_err(|e| StoreError::Init(format!("failed to read schema version: {}", e)))
  }

  /// Get a reference to the connection
  pub fn conn(&self) -> &Connection {
    &self.conn
  }

  pub fn conn_mut(&mut self) -> &mut Connection {
    &mut self.conn
  }
}
