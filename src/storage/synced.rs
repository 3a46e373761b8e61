use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

use crate::error::{AppError, AppResult};
use crate::storage::{ChangeBus, DurableStorage, Reconcile};

struct Cache<T> {
    items: Vec<T>,
    /// Raw value last read from or written to storage. `None` when the key was absent.
    snapshot: Option<String>,
}

/// An in-memory copy of one storage key, kept in step with durable storage.
///
/// Writes go through to storage immediately and are announced on the
/// [`ChangeBus`]. [`reconcile`](Self::reconcile) pulls in writes made by other
/// contexts and only replaces the cache when the contents actually differ, so
/// subscribers are woken for real changes only.
pub struct SyncedCollection<T> {
    key: &'static str,
    storage: Arc<dyn DurableStorage>,
    bus: ChangeBus,
    cache: RwLock<Cache<T>>,
    version: watch::Sender<u64>,
}

impl<T> SyncedCollection<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Hydrate from storage. A corrupt value is logged and read as empty.
    pub fn open(
        key: &'static str,
        storage: Arc<dyn DurableStorage>,
        bus: ChangeBus,
    ) -> AppResult<Self> {
        let snapshot = storage.get(key)?;
        let items = snapshot
            .as_deref()
            .map(|raw| decode(key, raw))
            .unwrap_or_default();
        let (version, _) = watch::channel(0);

        tracing::info!("Opened '{}' with {} records", key, items.len());
        Ok(Self {
            key,
            storage,
            bus,
            cache: RwLock::new(Cache { items, snapshot }),
            version,
        })
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn items(&self) -> AppResult<Vec<T>> {
        Ok(self.read()?.items.clone())
    }

    /// Run a read-only query against the cache without cloning it.
    pub fn with_items<R>(&self, f: impl FnOnce(&[T]) -> R) -> AppResult<R> {
        Ok(f(&self.read()?.items))
    }

    /// Apply `f` to a copy of the cache and write the result through.
    ///
    /// If `f` fails nothing is written. If `f` leaves the contents unchanged
    /// storage is not touched and nobody is notified.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Vec<T>) -> AppResult<R>) -> AppResult<R> {
        let mut cache = self.write()?;
        let mut next = cache.items.clone();
        let out = f(&mut next)?;

        let raw = serde_json::to_string(&next)?;
        if raw == serde_json::to_string(&cache.items)? {
            return Ok(out);
        }

        self.storage.set(self.key, &raw)?;
        cache.items = next;
        cache.snapshot = Some(raw);
        drop(cache);

        self.notify();
        self.bus.publish();
        Ok(out)
    }

    /// Re-read storage and replace the cache only if the contents differ.
    /// Returns whether the cache changed.
    pub fn reconcile(&self) -> AppResult<bool> {
        let raw = self.storage.get(self.key)?;
        let mut cache = self.write()?;

        let Some(raw) = raw else {
            cache.snapshot = None;
            if cache.items.is_empty() {
                return Ok(false);
            }
            tracing::info!("'{}' was cleared externally, dropping cached records", self.key);
            cache.items.clear();
            drop(cache);
            self.notify();
            return Ok(true);
        };

        if cache.snapshot.as_deref() == Some(raw.as_str()) {
            tracing::debug!("'{}' unchanged", self.key);
            return Ok(false);
        }

        let changed = match serde_json::from_str::<Vec<T>>(&raw) {
            Ok(parsed) => {
                let same = serde_json::to_string(&parsed)? == serde_json::to_string(&cache.items)?;
                if !same {
                    tracing::info!("'{}' changed in storage, {} records", self.key, parsed.len());
                    cache.items = parsed;
                }
                !same
            }
            Err(e) => {
                tracing::error!(
                    key = self.key,
                    error = %e,
                    "Corrupt value in durable storage, treating as empty"
                );
                let had_items = !cache.items.is_empty();
                cache.items.clear();
                had_items
            }
        };
        cache.snapshot = Some(raw);
        drop(cache);

        if changed {
            self.notify();
        }
        Ok(changed)
    }

    /// Unconditionally replace the cache with what storage holds (manual refresh).
    pub fn reload(&self) -> AppResult<()> {
        let snapshot = self.storage.get(self.key)?;
        let items = snapshot
            .as_deref()
            .map(|raw| decode(self.key, raw))
            .unwrap_or_default();

        let mut cache = self.write()?;
        tracing::info!("Reloaded '{}', {} records", self.key, items.len());
        cache.items = items;
        cache.snapshot = snapshot;
        drop(cache);

        self.notify();
        Ok(())
    }

    /// Version counter bumped on every change to the cached contents.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    fn notify(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    fn read(&self) -> AppResult<RwLockReadGuard<'_, Cache<T>>> {
        self.cache
            .read()
            .map_err(|_| AppError::Internal(format!("'{}' cache lock poisoned", self.key)))
    }

    fn write(&self) -> AppResult<RwLockWriteGuard<'_, Cache<T>>> {
        self.cache
            .write()
            .map_err(|_| AppError::Internal(format!("'{}' cache lock poisoned", self.key)))
    }
}

impl<T> Reconcile for SyncedCollection<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn key(&self) -> &'static str {
        self.key
    }

    fn reconcile(&self) -> AppResult<bool> {
        SyncedCollection::reconcile(self)
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Vec<T> {
    match serde_json::from_str(raw) {
        Ok(items) => items,
        Err(e) => {
            tracing::error!(
                key,
                error = %e,
                "Corrupt value in durable storage, treating as empty"
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: u32,
        label: String,
    }

    fn item(id: u32, label: &str) -> Item {
        Item {
            id,
            label: label.to_string(),
        }
    }

    fn open(storage: &Arc<MemoryStorage>, bus: &ChangeBus) -> SyncedCollection<Item> {
        SyncedCollection::open("things", storage.clone(), bus.clone()).unwrap()
    }

    #[test]
    fn mutate_writes_through_and_notifies() {
        let storage = Arc::new(MemoryStorage::new());
        let bus = ChangeBus::new();
        let mut signals = bus.subscribe();
        let things = open(&storage, &bus);
        let rx = things.subscribe();

        things
            .mutate(|items| {
                items.push(item(1, "a"));
                Ok(())
            })
            .unwrap();

        assert_eq!(
            storage.get("things").unwrap().as_deref(),
            Some(r#"[{"id":1,"label":"a"}]"#)
        );
        assert!(rx.has_changed().unwrap());
        assert!(signals.try_recv().is_ok());
    }

    #[test]
    fn failed_mutation_leaves_everything_untouched() {
        let storage = Arc::new(MemoryStorage::new());
        let things = open(&storage, &ChangeBus::new());

        let result: AppResult<()> = things.mutate(|items| {
            items.push(item(1, "a"));
            Err(AppError::NotFound)
        });

        assert!(matches!(result, Err(AppError::NotFound)));
        assert!(things.items().unwrap().is_empty());
        assert_eq!(storage.get("things").unwrap(), None);
        assert_eq!(things.version(), 0);
    }

    #[test]
    fn unchanged_mutation_is_silent() {
        let storage = Arc::new(MemoryStorage::new());
        let bus = ChangeBus::new();
        let things = open(&storage, &bus);
        things
            .mutate(|items| {
                items.push(item(1, "a"));
                Ok(())
            })
            .unwrap();
        let version = things.version();
        let mut signals = bus.subscribe();

        things.mutate(|_| Ok(())).unwrap();

        assert_eq!(things.version(), version);
        assert!(signals.try_recv().is_err());
    }

    #[test]
    fn reconcile_picks_up_foreign_writes_once() {
        let storage = Arc::new(MemoryStorage::new());
        let bus = ChangeBus::new();
        let writer = open(&storage, &bus);
        let reader = open(&storage, &bus);

        writer
            .mutate(|items| {
                items.push(item(7, "seven"));
                Ok(())
            })
            .unwrap();

        assert!(reader.reconcile().unwrap());
        assert_eq!(reader.items().unwrap(), vec![item(7, "seven")]);
        assert!(!reader.reconcile().unwrap());
        assert_eq!(reader.version(), 1);
    }

    #[test]
    fn reconcile_ignores_formatting_only_differences() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("things", r#"[{"id":1,"label":"a"}]"#).unwrap();
        let things = open(&storage, &ChangeBus::new());

        storage
            .set("things", "[ { \"id\": 1, \"label\": \"a\" } ]")
            .unwrap();

        assert!(!things.reconcile().unwrap());
        assert_eq!(things.version(), 0);
    }

    #[test]
    fn reconcile_clears_cache_when_storage_is_emptied() {
        let storage = Arc::new(MemoryStorage::new());
        let things = open(&storage, &ChangeBus::new());
        things
            .mutate(|items| {
                items.push(item(1, "a"));
                Ok(())
            })
            .unwrap();

        storage.remove("things").unwrap();

        assert!(things.reconcile().unwrap());
        assert!(things.items().unwrap().is_empty());
        assert!(!things.reconcile().unwrap());
    }

    #[test]
    fn corrupt_storage_reads_as_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("things", "{not json").unwrap();
        let things = open(&storage, &ChangeBus::new());
        assert!(things.items().unwrap().is_empty());

        storage.set("things", r#"[{"id":2,"label":"b"}]"#).unwrap();
        assert!(things.reconcile().unwrap());

        storage.set("things", "garbage").unwrap();
        assert!(things.reconcile().unwrap());
        assert!(things.items().unwrap().is_empty());
        // Same corrupt bytes again: nothing new to report.
        assert!(!things.reconcile().unwrap());
    }

    #[test]
    fn reload_discards_unsynced_cache() {
        let storage = Arc::new(MemoryStorage::new());
        let things = open(&storage, &ChangeBus::new());
        things
            .mutate(|items| {
                items.push(item(1, "a"));
                Ok(())
            })
            .unwrap();
        storage.set("things", r#"[{"id":9,"label":"z"}]"#).unwrap();

        things.reload().unwrap();

        assert_eq!(things.items().unwrap(), vec![item(9, "z")]);
    }
}
