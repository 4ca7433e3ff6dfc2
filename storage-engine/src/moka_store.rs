use async_trait::async_trait;
use bytes::Bytes;
use keeper::KvStore;
use moka::Expiry;
use moka::future::Cache;
use shared::StoreError;
use std::fmt::Debug;
use std::time::{Duration, Instant};

#[derive(Clone)]
struct Entry {
    payload: Bytes,
    // None = never expires
    ttl: Option<Duration>,
}

/// Expiry policy that reads the TTL stored alongside each entry
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        // An overwrite restarts the clock with the new entry's TTL
        value.ttl
    }
}

/// Moka-based in-process store with per-entry TTL
/// Lock-free and safe to share across tasks; optionally bounded by entry count
pub struct MokaStore {
    cache: Cache<String, Entry>,
}

impl MokaStore {
    pub fn new(max_entries: Option<u64>) -> Self {
        let mut builder = Cache::builder().name("keeper").expire_after(PerEntryTtl);

        if let Some(capacity) = max_entries {
            builder = builder.max_capacity(capacity);
        }

        Self {
            cache: builder.build(),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Approximate, eviction and expiry are applied lazily
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for MokaStore {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[async_trait]
impl KvStore for MokaStore {
    async fn read(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        // Expired entries are never returned, even before eviction runs
        Ok(self.cache.get(key).await.map(|entry| entry.payload))
    }

    async fn write(&self, key: &str, payload: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let ttl = (!ttl.is_zero()).then_some(ttl);
        self.cache.insert(key.to_string(), Entry { payload, ttl }).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.cache.invalidate(key).await;
        Ok(())
    }
}

impl Debug for MokaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaStore")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_moka_store_write_and_read() {
        let store = MokaStore::unbounded();

        store.write("hello", Bytes::from("world"), HOUR).await.unwrap();

        let value = store.read("hello").await.unwrap();
        assert_eq!(value, Some(Bytes::from("world")));
    }

    #[tokio::test]
    async fn test_moka_store_delete() {
        let store = MokaStore::unbounded();

        store.write("test_key", Bytes::from("test_value"), HOUR).await.unwrap();
        store.delete("test_key").await.unwrap();
        assert_eq!(store.read("test_key").await.unwrap(), None);

        // Deleting an absent key is fine
        store.delete("test_key").await.unwrap();
    }

    #[tokio::test]
    async fn test_moka_store_read_nonexistent() {
        let store = MokaStore::unbounded();
        assert_eq!(store.read("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_moka_store_overwrite() {
        let store = MokaStore::unbounded();

        store.write("key", Bytes::from("value1"), HOUR).await.unwrap();
        store.write("key", Bytes::from("value2"), HOUR).await.unwrap();

        assert_eq!(store.read("key").await.unwrap(), Some(Bytes::from("value2")));
    }

    #[tokio::test]
    async fn test_moka_store_per_entry_ttl() {
        let store = MokaStore::unbounded();

        store
            .write("short", Bytes::from("a"), Duration::from_millis(100))
            .await
            .unwrap();
        store.write("long", Bytes::from("b"), HOUR).await.unwrap();

        // Should be available immediately
        assert!(store.read("short").await.unwrap().is_some());

        // Wait for expiration
        sleep(Duration::from_millis(200)).await;

        assert_eq!(store.read("short").await.unwrap(), None);
        assert_eq!(store.read("long").await.unwrap(), Some(Bytes::from("b")));
    }

    #[tokio::test]
    async fn test_moka_store_overwrite_replaces_ttl() {
        let store = MokaStore::unbounded();

        store
            .write("key", Bytes::from("a"), Duration::from_millis(100))
            .await
            .unwrap();
        store.write("key", Bytes::from("b"), HOUR).await.unwrap();

        sleep(Duration::from_millis(200)).await;
        assert_eq!(store.read("key").await.unwrap(), Some(Bytes::from("b")));
    }

    #[tokio::test]
    async fn test_moka_store_zero_ttl_never_expires() {
        let store = MokaStore::unbounded();

        store.write("key", Bytes::from("a"), Duration::ZERO).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(store.read("key").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_moka_store_bounded() {
        let store = MokaStore::new(Some(2)); // Max 2 entries

        // Insert 3 entries
        store.write("key1", Bytes::from("value1"), HOUR).await.unwrap();
        store.write("key2", Bytes::from("value2"), HOUR).await.unwrap();
        store.write("key3", Bytes::from("value3"), HOUR).await.unwrap();

        store.run_pending_tasks().await;

        assert!(store.entry_count() <= 2, "Store should have at most 2 entries");
    }
}
