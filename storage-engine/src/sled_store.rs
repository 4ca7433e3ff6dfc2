use async_trait::async_trait;
use bytes::Bytes;
use keeper::KvStore;
use shared::StoreError;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// Records are [MAGIC][VERSION][expires_at_ms: u64 BE][payload]; 0 means no expiry
const MAGIC: u8 = 0xB7;
const VERSION: u8 = 1;
const HEADER_LEN: usize = 10;
const NEVER: u64 = 0;

/// Sled-backed persistent store
///
/// Sled has no native TTL, so each record carries its own deadline. Expired
/// records are dropped lazily on read and in bulk by [`SledStore::purge_expired`].
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open (or create) a store at `path`
    /// Creates the parent directory if it doesn't exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("Failed to create directory: {}", e))
            })?;
        }

        let db = sled::open(path)
            .map_err(|e| StoreError::Unavailable(format!("Failed to open Sled database: {}", e)))?;

        Ok(Self { db })
    }

    /// A throwaway store removed when dropped
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::Unavailable(format!("Failed to open Sled database: {}", e)))?;
        Ok(Self { db })
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    pub async fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush_async()
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Rejected(format!("Failed to flush database: {}", e)))
    }

    /// Remove every expired record, returning how many were dropped
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = now_ms();
        let mut purged = 0;

        for item in self.db.iter() {
            let (key, raw) = item
                .map_err(|e| StoreError::Unavailable(format!("Failed to iterate database: {}", e)))?;

            let expires_at = match split_record(&raw) {
                Ok((expires_at, _)) => expires_at,
                // Left in place so readers keep seeing the error
                Err(e) => {
                    warn!("Skipping corrupt record {:?}: {}", String::from_utf8_lossy(&key), e);
                    continue;
                }
            };
            if is_expired(expires_at, now) && self.remove_if_unchanged(&key, &raw)? {
                purged += 1;
            }
        }

        Ok(purged)
    }

    /// Periodically purge expired records until the returned handle is aborted
    ///
    /// Each sweep walks the whole tree, so it runs on the blocking pool.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let store = self.clone();
                match tokio::task::spawn_blocking(move || store.purge_expired()).await {
                    Ok(Ok(0)) => {}
                    Ok(Ok(purged)) => info!("Purged {} expired entries", purged),
                    Ok(Err(e)) => warn!("Expiry sweep failed: {}", e),
                    Err(e) => warn!("Expiry sweep task failed: {}", e),
                }
            }
        })
    }

    // Delete only if nobody rewrote the key since we looked at it
    fn remove_if_unchanged(&self, key: &[u8], seen: &[u8]) -> Result<bool, StoreError> {
        let swapped = self
            .db
            .compare_and_swap(key, Some(seen), None::<&[u8]>)
            .map_err(|e| StoreError::Rejected(format!("Failed to delete entry: {}", e)))?;
        Ok(swapped.is_ok())
    }
}

#[async_trait]
impl KvStore for SledStore {
    async fn read(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let raw = self
            .db
            .get(key.as_bytes())
            .map_err(|e| StoreError::Unavailable(format!("Failed to get entry: {}", e)))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let (expires_at, payload) = split_record(&raw).map_err(|e| {
            warn!(key, "corrupt record: {}", e);
            StoreError::Corrupt(e)
        })?;

        if is_expired(expires_at, now_ms()) {
            debug!(key, "dropping expired entry");
            self.remove_if_unchanged(key.as_bytes(), &raw)?;
            return Ok(None);
        }

        Ok(Some(Bytes::copy_from_slice(payload)))
    }

    async fn write(&self, key: &str, payload: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = if ttl.is_zero() {
            NEVER
        } else {
            now_ms().saturating_add(ttl.as_millis().min(u64::MAX as u128) as u64)
        };

        let mut record = Vec::with_capacity(HEADER_LEN + payload.len());
        record.extend_from_slice(&[MAGIC, VERSION]);
        record.extend_from_slice(&expires_at.to_be_bytes());
        record.extend_from_slice(&payload);

        self.db
            .insert(key.as_bytes(), record)
            .map_err(|e| StoreError::Rejected(format!("Failed to save entry: {}", e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| StoreError::Rejected(format!("Failed to delete entry: {}", e)))?;
        Ok(())
    }
}

fn split_record(raw: &[u8]) -> Result<(u64, &[u8]), String> {
    let Some(([magic, version, expires_at @ ..], payload)) = raw.split_first_chunk::<HEADER_LEN>()
    else {
        return Err(format!("record is {} bytes, header needs {}", raw.len(), HEADER_LEN));
    };
    if *magic != MAGIC {
        return Err(format!("bad magic byte 0x{:02X}", magic));
    }
    if *version != VERSION {
        return Err(format!("unsupported record version {}", version));
    }
    let expires_at: [u8; 8] = *expires_at;
    Ok((u64::from_be_bytes(expires_at), payload))
}

fn is_expired(expires_at: u64, now: u64) -> bool {
    expires_at != NEVER && expires_at <= now
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
