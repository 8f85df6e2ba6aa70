//! Cache store trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::traits::StoredResponse;

/// Trait for durable response stores.
///
/// Entries are scoped by a generation identifier so a new worker version can
/// discard every bucket it does not own in one sweep at activation.
pub trait CacheStore: Send + Sync {
  /// Look up a response by request key within a generation.
  fn get(&self, generation: &str, key: &str) -> Result<Option<StoredResponse>>;

  /// Store a response, overwriting any previous entry for the same key.
  fn put(&self, generation: &str, key: &str, response: &StoredResponse) -> Result<()>;

  /// Store a batch of entries in one transaction; all or nothing.
  fn put_batch(&self, generation: &str, entries: &[(String, StoredResponse)]) -> Result<()>;

  /// List every generation currently holding entries.
  fn generations(&self) -> Result<Vec<String>>;

  /// Delete a whole generation and everything in it.
  fn delete_generation(&self, generation: &str) -> Result<()>;
}

impl<S: CacheStore> CacheStore for Arc<S> {
  fn get(&self, generation: &str, key: &str) -> Result<Option<StoredResponse>> {
    (**self).get(generation, key)
  }

  fn put(&self, generation: &str, key: &str, response: &StoredResponse) -> Result<()> {
    (**self).put(generation, key, response)
  }

  fn put_batch(&self, generation: &str, entries: &[(String, StoredResponse)]) -> Result<()> {
    (**self).put_batch(generation, entries)
  }

  fn generations(&self) -> Result<Vec<String>> {
    (**self).generations()
  }

  fn delete_generation(&self, generation: &str) -> Result<()> {
    (**self).delete_generation(generation)
  }
}

/// SQLite-based response store.
pub struct SqliteCacheStore {
  conn: Mutex<Connection>,
}

/// Schema for the response cache.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_generation
    ON response_cache(generation);
"#;

impl SqliteCacheStore {
  /// Open or create the store at the default location.
  pub fn open(data_dir: Option<&Path>) -> Result<Self> {
    let path = match data_dir {
      Some(dir) => dir.join("cache.db"),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open an in-memory store. Contents vanish with the connection.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("cachette").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

impl CacheStore for SqliteCacheStore {
  fn get(&self, generation: &str, key: &str) -> Result<Option<StoredResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body FROM response_cache
         WHERE generation = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare cache lookup: {}", e))?;

    // Only the no-rows case is a miss; a broken row must surface, not
    // masquerade as one
    let row: Option<(u16, String, Vec<u8>)> = stmt
      .query_row(params![generation, key], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read cached response: {}", e))?;

    match row {
      Some((status, headers_json, body)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers_json)
          .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
        Ok(Some(StoredResponse {
          status,
          headers,
          body,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, generation: &str, key: &str, response: &StoredResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache (generation, request_key, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![generation, key, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store response: {}", e))?;

    Ok(())
  }

  fn put_batch(&self, generation: &str, entries: &[(String, StoredResponse)]) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, response) in entries {
      let headers = match serde_json::to_string(&response.headers) {
        Ok(headers) => headers,
        Err(e) => {
          let _ = conn.execute("ROLLBACK", []);
          return Err(eyre!("Failed to serialize headers: {}", e));
        }
      };

      let result = conn.execute(
        "INSERT OR REPLACE INTO response_cache (generation, request_key, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![generation, key, response.status, headers, response.body],
      );

      if let Err(e) = result {
        let _ = conn.execute("ROLLBACK", []);
        return Err(eyre!("Failed to store response batch: {}", e));
      }
    }

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn generations(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT generation FROM response_cache ORDER BY generation")
      .map_err(|e| eyre!("Failed to prepare generation query: {}", e))?;

    let generations: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(generations)
  }

  fn delete_generation(&self, generation: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM response_cache WHERE generation = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete generation {}: {}", generation, e))?;

    Ok(())
  }
}
