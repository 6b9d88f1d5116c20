//! In-memory session store.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use super::{Mutation, SessionStore, SetOptions, StoreError, StoreResult};
use crate::session::RequestContext;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, options: SetOptions) -> Self {
        Self {
            value,
            // A TTL past what `Instant` can represent never expires.
            expires_at: options
                .ttl_seconds
                .and_then(|secs| Instant::now().checked_add(Duration::from_secs(secs))),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Thread-safe, process-local store with lazy TTL expiry.
///
/// Expired entries behave as absent everywhere and are purged on the next
/// write or listing. `update` runs under the write lock, so it is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|entries| entries.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, ctx: &RequestContext, key: &str) -> StoreResult<Option<Value>> {
        trace!(request_id = %ctx.request_id, key, "store get");
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: Value,
        options: SetOptions,
    ) -> StoreResult<()> {
        trace!(request_id = %ctx.request_id, key, ttl = ?options.ttl_seconds, "store set");
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.insert(key.to_string(), Entry::new(value, options));
        Ok(())
    }

    async fn delete(&self, ctx: &RequestContext, key: &str) -> StoreResult<bool> {
        trace!(request_id = %ctx.request_id, key, "store delete");
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();
        Ok(entries.remove(key).is_some_and(|e| e.is_live(now)))
    }

    async fn list(&self, ctx: &RequestContext, prefix: &str) -> StoreResult<Vec<String>> {
        trace!(request_id = %ctx.request_id, prefix, "store list");
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();
        entries.retain(|_, e| e.is_live(now));
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn update(
        &self,
        ctx: &RequestContext,
        key: &str,
        options: SetOptions,
        mutate: Mutation<'_>,
    ) -> StoreResult<Option<Value>> {
        trace!(request_id = %ctx.request_id, key, "store update");
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();
        let current = match entries.get(key) {
            Some(entry) if entry.is_live(now) => entry.value.clone(),
            Some(_) => {
                entries.remove(key);
                return Ok(None);
            }
            None => return Ok(None),
        };
        let next = mutate(current)?;
        entries.insert(key.to_string(), Entry::new(next.clone(), options));
        Ok(Some(next))
    }
}
