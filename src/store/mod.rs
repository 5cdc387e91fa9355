//! Key-value store abstraction.
//!
//! Every durable structure in reviewd (job records, the pending-order list,
//! rate-limit windows, cache entries) lives behind the [`KvStore`] trait,
//! which exposes exactly the primitives the pipeline relies on. Two
//! backends are provided:
//!
//! - **MemoryStore**: mutex-guarded in-process store for tests and development
//! - **RedisStore**: production backend over a multiplexed async connection
//!
//! The one atomicity guarantee the pipeline needs from a backend is that
//! [`KvStore::pop`] returns a given element to at most one caller.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;


/// Trait for key-value store backends.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get the string value stored at `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set `key` to `value`, optionally with a time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete the given keys. Returns the number of keys removed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// List keys matching a glob pattern (`*` wildcard).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Atomically increment the integer at `key`, creating it at 0 first.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Set a time-to-live on an existing key. Returns false if the key
    /// does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Append `value` to the tail of the list at `key`. Returns the new
    /// list length.
    async fn push(&self, key: &str, value: &str) -> Result<u64>;

    /// Atomically pop the head of the list at `key`.
    async fn pop(&self, key: &str) -> Result<Option<String>>;
}
