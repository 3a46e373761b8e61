//! Durable key/value storage shared by every execution context, plus the
//! synchronisation machinery the stores build on.

pub mod bus;
pub mod reconciler;
pub mod synced;

use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::state::DbPool;

pub use self::bus::ChangeBus;
pub use self::reconciler::{Reconcile, Reconciler};
pub use self::synced::SyncedCollection;

pub const USERS_KEY: &str = "users";
pub const PROPERTIES_KEY: &str = "properties";
pub const PAID_PROPERTIES_KEY: &str = "paidProperties";

/// A namespaced string store. Values are whole JSON documents; there is no
/// locking or versioning, so concurrent writers race and the last one wins.
pub trait DurableStorage: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<()>;
}

/// Storage backed by the `kv_store` table. Processes pointing at the same
/// database file share state the way browser tabs share local storage.
pub struct SqliteStorage {
    pool: DbPool,
}

impl SqliteStorage {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl DurableStorage for SqliteStorage {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let conn = self.pool.get()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> AppResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| AppError::Internal("memory storage lock poisoned".into()))
    }
}

impl DurableStorage for MemoryStorage {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.entries()?.remove(key);
        Ok(())
    }
}
