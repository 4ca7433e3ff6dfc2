#![deny(clippy::all)]

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::{Context, Result, StoreError};
use std::time::Duration;

// Ports are the pluggable extension points: the physical store below the
// serialization pipeline, and the typed cache above it.

/// Port for a raw key-value store holding opaque payloads
///
/// Implementations must be safe for concurrent use. A missing or expired key
/// is `Ok(None)`, never an error. A zero `ttl` means the entry never expires.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn read(&self, key: &str) -> std::result::Result<Option<Bytes>, StoreError>;
    async fn write(&self, key: &str, payload: Bytes, ttl: Duration) -> std::result::Result<(), StoreError>;
    /// Deleting an absent key succeeds
    async fn delete(&self, key: &str) -> std::result::Result<(), StoreError>;
}

/// Port for a typed cache: Get / Set / Remove over structured values
#[async_trait]
pub trait Cacher: Send + Sync + 'static {
    /// Read `key` into `slot`
    ///
    /// Returns `Ok(false)` when the key is absent. On `Err` the slot contents
    /// must not be trusted.
    async fn get<T>(&self, ctx: &Context, key: &str, slot: &mut T) -> Result<bool>
    where
        T: DeserializeOwned + Send;

    async fn set<T>(&self, ctx: &Context, key: &str, value: &T, ttl: Duration) -> Result<()>
    where
        T: Serialize + Sync + ?Sized;

    async fn remove(&self, ctx: &Context, key: &str) -> Result<()>;
}
