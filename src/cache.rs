//! Response cache contract and the in-memory reference implementation.
//!
//! Stored responses are defensively copied on both write and read, so
//! callers may freely mutate what they get back without corrupting the
//! store. Expired entries are treated as absent and removed lazily on read.

use crate::error::Result;
use crate::types::ChatResponse;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Storage contract used by the cache middleware.
///
/// Implementations must be safe for any number of concurrent readers and
/// writers. `set` with a non-positive TTL is a no-op.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Look up a response. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<ChatResponse>>;

    /// Store a copy of the response under the key for `ttl`.
    async fn set(&self, key: &str, response: &ChatResponse, ttl: Duration) -> Result<()>;

    /// Drop the entry under the key, if any.
    async fn remove(&self, key: &str) -> Result<()>;
}

struct Entry {
    response: ChatResponse,
    expires_at: Instant,
}

/// In-memory TTL cache behind a single map lock.
///
/// Coarse locking is deliberate: entries are small and accesses are short,
/// so one `RwLock` over the map serializes writers per the contract without
/// per-key bookkeeping.
#[derive(Default)]
pub struct InMemoryResponseCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryResponseCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        InMemoryResponseCache::default()
    }

    /// Number of live (possibly expired-but-unswept) entries. Test hook.
    pub fn len(&self) -> usize {
        self.read_entries(|map| map.len())
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_entries<T>(&self, f: impl FnOnce(&HashMap<String, Entry>) -> T) -> T {
        match self.entries.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ResponseCache for InMemoryResponseCache {
    async fn get(&self, key: &str) -> Result<Option<ChatResponse>> {
        let now = Instant::now();

        let hit = self.read_entries(|map| {
            map.get(key).map(|entry| {
                if entry.expires_at > now {
                    Some(entry.response.clone())
                } else {
                    None
                }
            })
        });

        match hit {
            // Absent entirely.
            None => Ok(None),
            // Present and live: the clone above is the defensive read copy.
            Some(Some(response)) => Ok(Some(response)),
            // Present but expired: sweep it on this read.
            Some(None) => {
                let mut map = self.write_entries();
                if map.get(key).is_some_and(|e| e.expires_at <= now) {
                    map.remove(key);
                }
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, response: &ChatResponse, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Ok(());
        }
        let entry = Entry {
            response: response.clone(),
            expires_at: Instant::now() + ttl,
        };
        self.write_entries().insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.write_entries().remove(key);
        Ok(())
    }
}
