//! In-process cache store with TTL and JSON snapshot persistence.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::{CacheError, CacheStore};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: Value,
    /// Expiry as milliseconds since the epoch.
    expires_at: u64,
}

impl Entry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

/// A thread-safe TTL cache.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, Entry>>,
    ttl: Duration,
    persistence_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            ttl,
            persistence_path: None,
        }
    }

    /// Load a snapshot if the file exists; later saves go to the same path.
    pub fn load_from_file(path: &Path, ttl: Duration) -> Result<Self, CacheError> {
        let mut store = Self::new(ttl);
        store.persistence_path = Some(path.to_path_buf());

        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let map: HashMap<String, Entry> = serde_json::from_reader(reader)?;
            let now = now_millis();
            for (key, entry) in map {
                if !entry.is_expired(now) {
                    store.inner.insert(key, entry);
                }
            }
            tracing::info!(entries = store.inner.len(), path = ?path, "Loaded cache snapshot");
        }
        Ok(store)
    }

    /// Write live entries to the snapshot path, if one is configured.
    pub fn save_to_file(&self) -> Result<(), CacheError> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        self.purge_expired();

        let map: HashMap<String, Entry> = self
            .inner
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &map)?;
        tracing::info!(entries = map.len(), path = ?path, "Saved cache snapshot");
        Ok(())
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = now_millis();
        self.inner.retain(|_, entry| !entry.is_expired(now));
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn expiry(&self) -> u64 {
        now_millis().saturating_add(self.ttl.as_millis() as u64)
    }

    /// Run `f` against the live entry for `key`, creating it with `init` when
    /// absent or expired. The TTL is refreshed afterwards.
    fn write<T>(
        &self,
        key: &str,
        init: impl FnOnce() -> Value,
        f: impl FnOnce(&mut Value) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let now = now_millis();
        let expires_at = self.expiry();
        match self.inner.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    entry.value = init();
                }
                let result = f(&mut entry.value)?;
                entry.expires_at = expires_at;
                Ok(result)
            }
            MapEntry::Vacant(vacant) => {
                let mut value = init();
                let result = f(&mut value)?;
                vacant.insert(Entry { value, expires_at });
                Ok(result)
            }
        }
    }

    /// Read the live entry for `key`, evicting it when expired.
    fn read<T>(&self, key: &str, f: impl FnOnce(&Value) -> Result<T, CacheError>) -> Result<Option<T>, CacheError> {
        let now = now_millis();
        match self.inner.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return f(&entry.value).map(Some),
            Some(_) => {}
        }
        self.inner.remove_if(key, |_, e| e.is_expired(now));
        Ok(None)
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.read(key, |value| match value {
            Value::Str(s) => Ok(s.clone()),
            _ => Err(CacheError::WrongType(key.to_string())),
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.inner.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: self.expiry(),
            },
        );
        Ok(())
    }

    fn get_from_hash(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let found = self.read(key, |value| match value {
            Value::Hash(h) => Ok(h.get(field).cloned()),
            _ => Err(CacheError::WrongType(key.to_string())),
        })?;
        Ok(found.flatten())
    }

    fn get_hash(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        let found = self.read(key, |value| match value {
            Value::Hash(h) => Ok(h.clone()),
            _ => Err(CacheError::WrongType(key.to_string())),
        })?;
        Ok(found.unwrap_or_default())
    }

    fn set_in_hash(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        self.write(
            key,
            || Value::Hash(HashMap::new()),
            |v| match v {
                Value::Hash(h) => {
                    h.insert(field.to_string(), value.to_string());
                    Ok(())
                }
                _ => Err(CacheError::WrongType(key.to_string())),
            },
        )
    }

    fn increment_in_hash(&self, key: &str, field: &str, by: i64) -> Result<i64, CacheError> {
        self.write(
            key,
            || Value::Hash(HashMap::new()),
            |v| match v {
                Value::Hash(h) => {
                    let current = match h.get(field) {
                        Some(raw) => raw.parse::<i64>().map_err(|_| CacheError::NotAnInteger {
                            key: key.to_string(),
                            field: field.to_string(),
                        })?,
                        None => 0,
                    };
                    let next = current + by;
                    h.insert(field.to_string(), next.to_string());
                    Ok(next)
                }
                _ => Err(CacheError::WrongType(key.to_string())),
            },
        )
    }

    fn add_to_list(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.write(
            key,
            || Value::List(VecDeque::new()),
            |v| match v {
                Value::List(list) => {
                    list.push_front(value.to_string());
                    Ok(())
                }
                _ => Err(CacheError::WrongType(key.to_string())),
            },
        )
    }

    fn get_from_list(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = now_millis();
        let Some(mut entry) = self.inner.get_mut(key) else {
            return Ok(None);
        };
        if entry.is_expired(now) {
            drop(entry);
            self.inner.remove_if(key, |_, e| e.is_expired(now));
            return Ok(None);
        }
        match &mut entry.value {
            Value::List(list) => Ok(list.pop_back()),
            _ => Err(CacheError::WrongType(key.to_string())),
        }
    }

    fn delete_keys(&self, keys: &[&str]) -> Result<usize, CacheError> {
        Ok(keys
            .iter()
            .filter(|key| self.inner.remove(**key).is_some())
            .count())
    }

    fn validate_connection(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new(Duration::from_secs(600))
    }

    #[test]
    fn test_string_and_hash_round_trip() {
        let cache = store();
        cache.set("k", "v").unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("v"));

        cache.set_in_hash("h", "f", "1").unwrap();
        assert_eq!(cache.get_from_hash("h", "f").unwrap().as_deref(), Some("1"));
        assert_eq!(cache.get_from_hash("h", "other").unwrap(), None);
        assert_eq!(cache.get("missing").unwrap(), None);
    }

    #[test]
    fn test_increment_sums() {
        let cache = store();
        let deltas = [1, 5, -2, 10];
        let mut last = 0;
        for d in deltas {
            last = cache.increment_in_hash("h", "n", d).unwrap();
        }
        assert_eq!(last, 14);
        assert_eq!(cache.get_from_hash("h", "n").unwrap().as_deref(), Some("14"));
    }

    #[test]
    fn test_increment_non_integer_fails() {
        let cache = store();
        cache.set_in_hash("h", "n", "abc").unwrap();
        assert!(matches!(
            cache.increment_in_hash("h", "n", 1),
            Err(CacheError::NotAnInteger { .. })
        ));
    }

    #[test]
    fn test_wrong_type() {
        let cache = store();
        cache.set("k", "v").unwrap();
        assert!(matches!(cache.set_in_hash("k", "f", "x"), Err(CacheError::WrongType(_))));
    }

    #[test]
    fn test_list_is_fifo() {
        let cache = store();
        cache.add_to_list("l", "a").unwrap();
        cache.add_to_list("l", "b").unwrap();
        cache.add_to_list("l", "c").unwrap();

        assert_eq!(cache.get_from_list("l").unwrap().as_deref(), Some("a"));
        assert_eq!(cache.get_from_list("l").unwrap().as_deref(), Some("b"));
        assert_eq!(cache.get_from_list("l").unwrap().as_deref(), Some("c"));
        assert_eq!(cache.get_from_list("l").unwrap(), None);
    }

    #[test]
    fn test_delete_keys() {
        let cache = store();
        cache.set("a", "1").unwrap();
        cache.set("b", "2").unwrap();
        assert_eq!(cache.delete_keys(&["a", "b", "c"]).unwrap(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entries_expire() {
        let cache = MemoryStore::new(Duration::from_millis(20));
        cache.set("k", "v").unwrap();
        cache.set_in_hash("h", "f", "1").unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(cache.get("k").unwrap(), None);
        assert_eq!(cache.get_from_hash("h", "f").unwrap(), None);
        // Writing to an expired hash starts a fresh one.
        assert_eq!(cache.increment_in_hash("h", "n", 1).unwrap(), 1);
    }

    #[test]
    fn test_snapshot_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = MemoryStore::load_from_file(&path, Duration::from_secs(600)).unwrap();
        cache.set("k", "v").unwrap();
        cache.add_to_list("l", "q1").unwrap();
        cache.set_in_hash("h", "f", "x").unwrap();
        cache.save_to_file().unwrap();

        let restored = MemoryStore::load_from_file(&path, Duration::from_secs(600)).unwrap();
        assert_eq!(restored.get("k").unwrap().as_deref(), Some("v"));
        assert_eq!(restored.get_from_hash("h", "f").unwrap().as_deref(), Some("x"));
        assert_eq!(restored.get_from_list("l").unwrap().as_deref(), Some("q1"));
    }
}
