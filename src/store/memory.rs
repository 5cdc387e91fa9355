//! In-memory store backend for testing and development.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;

use crate::error::{ErrorKind, Result, ReviewdError};

use super::KvStore;

struct ValueEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl ValueEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Default)]
struct Inner {
    strings: HashMap<String, ValueEntry>,
    lists: HashMap<String, VecDeque<String>>,
}

impl Inner {
    /// Drop an expired string entry so reads behave like the real store.
    fn evict_if_expired(&mut self, key: &str) {
        if self.strings.get(key).is_some_and(ValueEntry::is_expired) {
            self.strings.remove(key);
        }
    }
}

/// In-memory [`KvStore`] backend.
///
/// All operations run under a single mutex, which makes `pop` atomic: a
/// popped element is observed by exactly one caller.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Translate a redis-style glob pattern (`*` wildcard only) into a regex.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for part in pattern.split('*') {
        regex.push_str(&regex::escape(part));
        regex.push_str(".*");
    }
    // The trailing ".*" belongs to a '*' only if the pattern ends with one.
    if !pattern.ends_with('*') {
        regex.truncate(regex.len() - 2);
    }
    regex.push('$');
    Regex::new(&regex).map_err(|e| {
        ReviewdError::with_internal(ErrorKind::Internal, "Invalid key pattern", e.to_string())
    })
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock();
        inner.evict_if_expired(key);
        Ok(inner.strings.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.strings.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        for key in keys {
            if inner.strings.remove(key).is_some() {
                removed += 1;
            }
            if inner.lists.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let regex = glob_to_regex(pattern)?;
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .strings
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            inner.strings.remove(&key);
        }

        let mut matches: Vec<String> = inner
            .strings
            .keys()
            .chain(inner.lists.keys())
            .filter(|k| regex.is_match(k))
            .cloned()
            .collect();
        matches.sort();
        Ok(matches)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut inner = self.inner.lock();
        inner.evict_if_expired(key);
        match inner.strings.get_mut(key) {
            Some(entry) => {
                let current: i64 = entry.value.parse().map_err(|_| {
                    ReviewdError::new(
                        ErrorKind::StoreUnavailable,
                        "Value at key is not an integer",
                    )
                })?;
                let next = current + 1;
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                inner.strings.insert(
                    key.to_string(),
                    ValueEntry {
                        value: "1".to_string(),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock();
        inner.evict_if_expired(key);
        match inner.strings.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn push(&self, key: &str, value: &str) -> Result<u64> {
        let mut inner = self.inner.lock();
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        Ok(list.len() as u64)
    }

    async fn pop(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock();
        Ok(inner.lists.get_mut(key).and_then(VecDeque::pop_front))
    }
}
