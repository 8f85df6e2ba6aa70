//! Durable offline event queue with FIFO, at-least-once delivery.
//!
//! Events tracked while offline (or whose immediate delivery fails) are
//! appended to a queue persisted as JSON text, so they survive process
//! restarts. A flush pass snapshots the queue and delivers entries in
//! creation order; entries tracked during a pass wait for the next one.

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Storage key for the live queue.
const QUEUE_KEY: &str = "analytics-queue";
/// Storage key for the snapshot held by an in-progress flush pass.
///
/// The snapshot is persisted before the live queue is cleared, so a crash
/// mid-pass can duplicate deliveries but never lose entries.
const INFLIGHT_KEY: &str = "analytics-queue:inflight";

/// A tracked event awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
  pub event: String,
  pub data: serde_json::Map<String, serde_json::Value>,
  /// Creation time, milliseconds since the epoch.
  pub timestamp: i64,
  #[serde(default)]
  pub synced: bool,
}

impl QueueEntry {
  pub fn new(event: impl Into<String>, data: serde_json::Map<String, serde_json::Value>) -> Self {
    Self {
      event: event.into(),
      data,
      timestamp: Utc::now().timestamp_millis(),
      synced: false,
    }
  }
}

/// Text key-value storage the queue persists through.
pub trait QueueStore: Send + Sync {
  fn read(&self, key: &str) -> Result<Option<String>>;
  fn write(&self, key: &str, value: &str) -> Result<()>;
  fn remove(&self, key: &str) -> Result<()>;
}

impl<S: QueueStore> QueueStore for Arc<S> {
  fn read(&self, key: &str) -> Result<Option<String>> {
    (**self).read(key)
  }

  fn write(&self, key: &str, value: &str) -> Result<()> {
    (**self).write(key, value)
  }

  fn remove(&self, key: &str) -> Result<()> {
    (**self).remove(key)
  }
}

/// Remote endpoint queued events are delivered to.
#[async_trait]
pub trait DeliveryEndpoint: Send + Sync {
  /// Deliver one event. `Ok` means confirmed receipt; anything else is a
  /// delivery failure and the entry stays owed.
  async fn deliver(&self, entry: &QueueEntry) -> Result<()>;
}

/// SQLite-backed text key-value store.
pub struct SqliteQueueStore {
  conn: Mutex<Connection>,
}

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteQueueStore {
  /// Open or create the store at the default location.
  pub fn open(data_dir: Option<&Path>) -> Result<Self> {
    let path = match data_dir {
      Some(dir) => dir.join("queue.db"),
      None => Self::default_path()?,
    };

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open an in-memory store. Contents vanish with the connection.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory queue database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("cachette").join("queue.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(())
  }
}

impl QueueStore for SqliteQueueStore {
  fn read(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT value FROM kv WHERE key = ?")
      .map_err(|e| eyre!("Failed to prepare read: {}", e))?;

    let value: Option<String> = stmt.query_row(params![key], |row| row.get(0)).ok();
    Ok(value)
  }

  fn write(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write {}: {}", key, e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM kv WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove {}: {}", key, e))?;

    Ok(())
  }
}

/// The durable event queue.
///
/// Single-owner: the worker drives it from one task, so overlapping flush
/// passes cannot happen; the in-flight flag guards the re-entrant case all
/// the same.
pub struct EventQueue<S: QueueStore> {
  store: S,
  endpoint: Arc<dyn DeliveryEndpoint>,
  queue: Vec<QueueEntry>,
  online: bool,
  flushing: bool,
}

impl<S: QueueStore> EventQueue<S> {
  /// Load the persisted queue and adopt the given connectivity state.
  ///
  /// A leftover in-flight snapshot from an interrupted flush is folded back
  /// in front of the live queue. Corrupt or unreadable persisted state is
  /// treated as an empty queue, never as a fatal error.
  pub fn new(store: S, endpoint: Arc<dyn DeliveryEndpoint>, online: bool) -> Self {
    let mut queue = read_entries(&store, INFLIGHT_KEY);
    let recovered = queue.len();
    queue.extend(read_entries(&store, QUEUE_KEY));

    let mut this = Self {
      store,
      endpoint,
      queue,
      online,
      flushing: false,
    };

    if recovered > 0 {
      info!(recovered, "recovered in-flight entries from interrupted flush");
      if let Err(err) = this.save() {
        warn!("failed to persist recovered queue: {err}");
      }
      if let Err(err) = this.store.remove(INFLIGHT_KEY) {
        warn!("failed to clear in-flight snapshot: {err}");
      }
    }

    this
  }

  pub fn len(&self) -> usize {
    self.queue.len()
  }

  pub fn is_empty(&self) -> bool {
    self.queue.is_empty()
  }

  #[cfg(test)]
  pub fn entries(&self) -> &[QueueEntry] {
    &self.queue
  }

  pub fn set_online(&mut self, online: bool) {
    self.online = online;
  }

  /// Track an event.
  ///
  /// Online: attempt immediate delivery and fall back to the queue on
  /// failure; delivery problems never surface to the caller. Offline: append
  /// and persist before returning. Only persistence failures are errors.
  pub async fn track(
    &mut self,
    event: &str,
    data: serde_json::Map<String, serde_json::Value>,
  ) -> Result<()> {
    let entry = QueueEntry::new(event, data);

    if self.online {
      match self.endpoint.deliver(&entry).await {
        Ok(()) => {
          debug!(event, "event delivered");
          return Ok(());
        }
        Err(err) => {
          debug!(event, "immediate delivery failed, queueing: {err}");
        }
      }
    }

    self.queue.push(entry);
    self.save()
  }

  /// Run one flush pass; returns the number of entries delivered.
  ///
  /// The pass snapshots the queue, persists the snapshot under the in-flight
  /// key, clears the live queue, then delivers snapshot entries one at a
  /// time in creation order. On the first delivery failure the failed entry
  /// and everything after it are re-enqueued ahead of any entries tracked
  /// mid-pass. Delivered entries are never retried.
  pub async fn flush(&mut self) -> Result<usize> {
    if self.flushing {
      debug!("flush already in progress");
      return Ok(0);
    }
    if self.queue.is_empty() {
      return Ok(0);
    }

    self.flushing = true;
    let result = self.flush_pass().await;
    self.flushing = false;
    result
  }

  async fn flush_pass(&mut self) -> Result<usize> {
    let snapshot = std::mem::take(&mut self.queue);
    let total = snapshot.len();

    let serialized = match serde_json::to_string(&snapshot) {
      Ok(serialized) => serialized,
      Err(e) => {
        self.queue = snapshot;
        return Err(eyre!("Failed to serialize flush snapshot: {}", e));
      }
    };
    if let Err(err) = self.store.write(INFLIGHT_KEY, &serialized) {
      self.queue = snapshot;
      return Err(err);
    }
    if let Err(err) = self.save() {
      // Entries stay owed in memory and under the live key, not twice
      self.queue = snapshot;
      let _ = self.store.remove(INFLIGHT_KEY);
      return Err(err);
    }

    let mut delivered = 0;
    for entry in &snapshot {
      match self.endpoint.deliver(entry).await {
        Ok(()) => delivered += 1,
        Err(err) => {
          warn!(event = %entry.event, "delivery failed, re-queueing remainder: {err}");
          break;
        }
      }
    }

    if delivered < total {
      let mut remainder = snapshot[delivered..].to_vec();
      remainder.append(&mut self.queue);
      self.queue = remainder;
      self.save()?;
    }
    self.store.remove(INFLIGHT_KEY)?;

    info!(delivered, requeued = total - delivered, "flush pass complete");
    Ok(delivered)
  }

  fn save(&self) -> Result<()> {
    let serialized = serde_json::to_string(&self.queue)
      .map_err(|e| eyre!("Failed to serialize queue: {}", e))?;
    self.store.write(QUEUE_KEY, &serialized)
  }
}

/// Read and parse one persisted entry list; anything wrong yields empty.
fn read_entries<S: QueueStore>(store: &S, key: &str) -> Vec<QueueEntry> {
  match store.read(key) {
    Ok(Some(text)) => match serde_json::from_str(&text) {
      Ok(entries) => entries,
      Err(err) => {
        warn!(key, "discarding corrupt persisted queue: {err}");
        Vec::new()
      }
    },
    Ok(None) => Vec::new(),
    Err(err) => {
      warn!(key, "failed to read persisted queue, starting empty: {err}");
      Vec::new()
    }
  }
}
