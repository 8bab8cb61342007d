//! Shared key/value store with per-entry TTL.
//!
//! This is the process-external store the collector shares with its
//! neighbours: viewers read live frames from it and the recording controller
//! writes the dataset trigger into it. Entries past their TTL are invisible
//! to `get` even before they are physically removed.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub trait TtlStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace `key`. `None` means the entry never expires.
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;
}

/// SQLite-backed store. Several processes (one per camera, plus viewers) may
/// open the same file.
pub struct SqliteTtlStore {
    conn: Mutex<Connection>,
}

impl SqliteTtlStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(2))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.lock()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS ttl_entries (
              key TEXT PRIMARY KEY,
              value BLOB NOT NULL,
              expires_at_ms INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_ttl_expires ON ttl_entries(expires_at_ms);
            "#,
        )?;
        Ok(())
    }

    /// Physically remove expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let removed = self.lock()?.execute(
            "DELETE FROM ttl_entries WHERE expires_at_ms IS NOT NULL AND expires_at_ms <= ?1",
            params![now_ms()?],
        )?;
        Ok(removed)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("store connection lock poisoned"))
    }
}

impl TtlStore for SqliteTtlStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM ttl_entries
                 WHERE key = ?1 AND (expires_at_ms IS NULL OR expires_at_ms > ?2)",
                params![key, now_ms()?],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let expires_at = match ttl {
            Some(ttl) => Some(
                now_ms()?
                    .checked_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
                    .unwrap_or(i64::MAX),
            ),
            None => None,
        };
        self.lock()?.execute(
            "INSERT INTO ttl_entries (key, value, expires_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at_ms = excluded.expires_at_ms",
            params![key, value, expires_at],
        )?;
        Ok(())
    }
}

fn now_ms() -> Result<i64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| anyhow!("system clock before unix epoch"))?;
    i64::try_from(elapsed.as_millis()).map_err(|_| anyhow!("system clock out of range"))
}

/// In-process store for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryTtlStore {
    entries: Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
}

impl InMemoryTtlStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, (Vec<u8>, Option<Instant>)>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl TtlStore for InMemoryTtlStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.lock()?;
        let expired = match entries.get(key) {
            None => return Ok(None),
            Some((_, Some(expires_at))) => *expires_at <= Instant::now(),
            Some((_, None)) => false,
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.lock()?
            .insert(key.to_string(), (value.to_vec(), expires_at));
        Ok(())
    }
}
