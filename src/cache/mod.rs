//! Response cache over the key-value store.
//!
//! Memoizes idempotent upstream results (diffs, PR metadata, completions)
//! that are acceptable to serve slightly stale. Reads never fail: any store
//! or decode problem degrades to a cache miss so the caller just pays for
//! the upstream call again. Writes return their error; callers log and move
//! on.

mod key;

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::store::KvStore;

pub use key::{cache_key, CacheNamespace};

/// Cache facade over a [`KvStore`].
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn KvStore>,
}

impl Cache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Look up a cached value. Store faults and undecodable entries both
    /// degrade to `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                counter!("cache_errors_total", "op" => "get").increment(1);
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        let Some(raw) = raw else {
            counter!("cache_misses_total").increment(1);
            return None;
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                counter!("cache_hits_total").increment(1);
                Some(value)
            }
            Err(e) => {
                counter!("cache_errors_total", "op" => "decode").increment(1);
                tracing::warn!(key = %key, error = %e, "Undecodable cache entry, treating as miss");
                None
            }
        }
    }

    /// Store a value with the given TTL.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let serialized = serde_json::to_string(value)?;
        self.store.set(key, &serialized, Some(ttl)).await?;
        counter!("cache_sets_total").increment(1);
        Ok(())
    }
}
