/// Durable key/value media for the scenario list
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::MediumError;

/// Default capacity ceiling of a medium (5 MiB)
pub const DEFAULT_CAPACITY_BYTES: u64 = 5 * 1024 * 1024;

pub fn app_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
    base.join("corkscene")
}

/// Key/value storage with a hard capacity ceiling. An absent key reads as `None`.
pub trait DurableMedium: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, MediumError>;

    /// Fails with [`MediumError::QuotaExceeded`] when the stored total would
    /// exceed the capacity
    fn write(&self, key: &str, value: &str) -> Result<(), MediumError>;

    fn remove(&self, key: &str) -> Result<(), MediumError>;
}

/// In-process medium, lost on exit
pub struct MemoryMedium {
    capacity: u64,
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryMedium {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryMedium {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_BYTES)
    }
}

impl DurableMedium for MemoryMedium {
    fn read(&self, key: &str) -> Result<Option<String>, MediumError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), MediumError> {
        let mut entries = self.entries.lock();
        let others: u64 = entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(_, v)| v.len() as u64)
            .sum();
        let needed = others + value.len() as u64;
        if needed > self.capacity {
            return Err(MediumError::QuotaExceeded {
                needed,
                limit: self.capacity,
            });
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), MediumError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// SQLite-backed medium in a single `kv` table
pub struct SqliteMedium {
    conn: Mutex<Connection>,
    path: PathBuf,
    capacity: u64,
}

impl SqliteMedium {
    pub fn open_or_create(path: &Path, capacity: u64) -> Result<Self, MediumError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        apply_migrations(&conn)?;
        debug!(path = %path.display(), capacity, "opened scenario database");
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            capacity,
        })
    }

    /// `<data_local_dir>/corkscene/scenarios.db`
    pub fn default_path() -> PathBuf {
        app_data_dir().join("scenarios.db")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DurableMedium for SqliteMedium {
    fn read(&self, key: &str) -> Result<Option<String>, MediumError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn write(&self, key: &str, value: &str) -> Result<(), MediumError> {
        let conn = self.conn.lock();
        let others: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(value AS BLOB))), 0) FROM kv WHERE key != ?1",
            params![key],
            |row| row.get(0),
        )?;
        let needed = others.max(0) as u64 + value.len() as u64;
        if needed > self.capacity {
            return Err(MediumError::QuotaExceeded {
                needed,
                limit: self.capacity,
            });
        }
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO kv(key, value, updated_at) VALUES(?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), MediumError> {
        self.conn
            .lock()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

fn apply_migrations(conn: &Connection) -> Result<(), MediumError> {
    conn.execute_batch(include_str!("../migrations/V0001__kv.sql"))?;
    conn.execute(
        "INSERT OR IGNORE INTO migrations(name, applied_at) VALUES(?1, strftime('%s','now'))",
        params!["V0001__kv"],
    )?;
    Ok(())
}
