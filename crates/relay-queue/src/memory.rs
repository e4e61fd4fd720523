//! In-process [`KeyValueStore`] backed by a mutex-guarded map.
//!
//! Deadlines use [`tokio::time::Instant`] so paused-clock tests can expire keys
//! without sleeping.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::StorageError;
use tokio::time::Instant;

use crate::kv::{KeyValueStore, KvResult};

#[derive(Debug)]
enum Data {
    List(VecDeque<String>),
    Value(String),
}

#[derive(Debug)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys, including expired ones not yet purged.
    pub fn key_count(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Drop `key` if its deadline has passed.
fn evict_expired(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        let _ = entries.remove(key);
    }
}

fn wrong_type(key: &str) -> StorageError {
    StorageError::new(format!("wrong value type for key '{key}'"))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn push_back(&self, key: &str, value: String, ttl: Option<Duration>) -> KvResult<usize> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        evict_expired(&mut entries, key, now);
        let entry = entries.entry(key.to_owned()).or_insert_with(|| Entry {
            data: Data::List(VecDeque::new()),
            expires_at: None,
        });
        let Data::List(list) = &mut entry.data else {
            return Err(wrong_type(key));
        };
        list.push_back(value);
        let len = list.len();
        if let Some(ttl) = ttl {
            entry.expires_at = now.checked_add(ttl);
        }
        Ok(len)
    }

    async fn pop_front(&self, key: &str) -> KvResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        evict_expired(&mut entries, key, now);
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        let Data::List(list) = &mut entry.data else {
            return Err(wrong_type(key));
        };
        let head = list.pop_front();
        if list.is_empty() {
            let _ = entries.remove(key);
        }
        Ok(head)
    }

    async fn list_len(&self, key: &str) -> KvResult<usize> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        evict_expired(&mut entries, key, now);
        match entries.get(key).map(|e| &e.data) {
            None => Ok(0),
            Some(Data::List(list)) => Ok(list.len()),
            Some(Data::Value(_)) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> KvResult<()> {
        let now = Instant::now();
        let _ = self.entries.lock().insert(
            key.to_owned(),
            Entry {
                data: Data::Value(value),
                expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        evict_expired(&mut entries, key, now);
        match entries.get(key).map(|e| &e.data) {
            None => Ok(None),
            Some(Data::Value(value)) => Ok(Some(value.clone())),
            Some(Data::List(_)) => Err(wrong_type(key)),
        }
    }

    async fn take(&self, key: &str) -> KvResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        evict_expired(&mut entries, key, now);
        match entries.get(key).map(|e| &e.data) {
            None => return Ok(None),
            Some(Data::List(_)) => return Err(wrong_type(key)),
            Some(Data::Value(_)) => {}
        }
        match entries.remove(key) {
            Some(Entry {
                data: Data::Value(value),
                ..
            }) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        evict_expired(&mut entries, key, now);
        Ok(entries.remove(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        evict_expired(&mut entries, key, now);
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = now.checked_add(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn purge_expired(&self) -> KvResult<usize> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - entries.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
