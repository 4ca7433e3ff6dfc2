use crate::ports::KvStore;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use shared::StoreError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// In-process store double with failure switches
#[derive(Debug, Default)]
pub(crate) struct MapStore {
    entries: DashMap<String, Bytes>,
    pub(crate) reads: AtomicUsize,
    pub(crate) writes: AtomicUsize,
    pub(crate) unavailable: AtomicBool,
    pub(crate) reject_writes: AtomicBool,
    /// Accept writes but keep nothing, like a store evicting immediately
    pub(crate) drop_writes: AtomicBool,
    pub(crate) read_delay: Option<Duration>,
}

impl MapStore {
    pub(crate) fn slow(read_delay: Duration) -> Self {
        Self {
            read_delay: Some(read_delay),
            ..Self::default()
        }
    }

    pub(crate) fn raw(&self, key: &str) -> Option<Bytes> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub(crate) fn put_raw(&self, key: &str, payload: &'static [u8]) {
        self.entries.insert(key.to_string(), Bytes::from_static(payload));
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MapStore {
    async fn read(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        self.check_available()?;
        Ok(self.raw(key))
    }

    async fn write(&self, key: &str, payload: Bytes, _ttl: Duration) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("read only replica".to_string()));
        }
        if !self.drop_writes.load(Ordering::SeqCst) {
            self.entries.insert(key.to_string(), payload);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.entries.remove(key);
        Ok(())
    }
}
