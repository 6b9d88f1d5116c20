//! Session store contract.
//!
//! A tenant-aware, TTL-capable key/value interface used to persist session
//! records. Backends vary (filesystem, SQL, document, object storage); the
//! managers only rely on the operations below and tolerate eventual
//! consistency.
//!
//! Values cross the trait boundary as [`serde_json::Value`] so the trait
//! stays object-safe; [`SessionStoreExt`] adds typed access on top.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::session::RequestContext;

/// Errors raised by session store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,
}

/// Convenience type alias for store results.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Options for writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Expire the record no later than this many seconds after the write.
    pub ttl_seconds: Option<u64>,
}

impl SetOptions {
    pub fn ttl(seconds: u64) -> Self {
        Self {
            ttl_seconds: Some(seconds),
        }
    }
}

/// In-place mutation applied by [`SessionStore::update`].
pub type Mutation<'a> = &'a mut (dyn FnMut(Value) -> StoreResult<Value> + Send);

/// Storage interface for session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a value. Absence is the only not-found signal.
    async fn get(&self, ctx: &RequestContext, key: &str) -> StoreResult<Option<Value>>;

    /// Write a value, overwriting any existing one.
    async fn set(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: Value,
        options: SetOptions,
    ) -> StoreResult<()>;

    /// Remove a value. Returns true iff a live value existed.
    async fn delete(&self, ctx: &RequestContext, key: &str) -> StoreResult<bool>;

    /// List live keys starting with `prefix`.
    async fn list(&self, ctx: &RequestContext, prefix: &str) -> StoreResult<Vec<String>>;

    /// Apply `mutate` to an existing value and write the result back.
    ///
    /// Returns the new value, or `None` without calling `mutate` if the key
    /// is absent. The default is a plain read-then-write; backends with
    /// native atomics (compare-and-swap, server-side scripts) should
    /// override it so concurrent updates cannot clobber each other.
    async fn update(
        &self,
        ctx: &RequestContext,
        key: &str,
        options: SetOptions,
        mutate: Mutation<'_>,
    ) -> StoreResult<Option<Value>> {
        let Some(current) = self.get(ctx, key).await? else {
            return Ok(None);
        };
        let next = mutate(current)?;
        self.set(ctx, key, next.clone(), options).await?;
        Ok(Some(next))
    }
}

/// Typed helpers over [`SessionStore`].
#[async_trait]
pub trait SessionStoreExt: SessionStore {
    /// Load and deserialize a value.
    async fn get_json<T>(&self, ctx: &RequestContext, key: &str) -> StoreResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(ctx, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write a value.
    async fn set_json<T>(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> StoreResult<()>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.set(ctx, key, value, options).await
    }

    /// Typed form of [`SessionStore::update`].
    async fn update_json<T, F>(
        &self,
        ctx: &RequestContext,
        key: &str,
        options: SetOptions,
        mut f: F,
    ) -> StoreResult<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut(&mut T) + Send,
    {
        let mut mutate = |value: Value| -> StoreResult<Value> {
            let mut typed: T = serde_json::from_value(value)?;
            f(&mut typed);
            Ok(serde_json::to_value(&typed)?)
        };
        match self.update(ctx, key, options, &mut mutate).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

impl<S: SessionStore + ?Sized> SessionStoreExt for S {}
