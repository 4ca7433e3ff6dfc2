//! Concrete [`KvStore`] backends: an in-process Moka cache and a persistent
//! Sled database, both honouring per-entry TTLs.

pub mod moka_store;
pub mod sled_store;

pub use moka_store::MokaStore;
pub use sled_store::SledStore;

use keeper::KvStore;
use shared::StoreError;
use shared::config::{Config, StoreKind};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

const SLED_FILE: &str = "keeper.sled";

/// A store opened from configuration
#[derive(Clone)]
pub enum Store {
    Memory(Arc<MokaStore>),
    Sled(Arc<SledStore>),
}

impl Store {
    pub fn as_kv(&self) -> Arc<dyn KvStore> {
        match self {
            Store::Memory(store) => store.clone(),
            Store::Sled(store) => store.clone(),
        }
    }

    /// Start background expiry where the backend needs one
    ///
    /// Moka expires entries itself, so only Sled gets a sweeper.
    pub fn spawn_maintenance(&self, every: Duration) -> Option<JoinHandle<()>> {
        match self {
            Store::Memory(_) => None,
            Store::Sled(store) => Some(store.clone().spawn_sweeper(every)),
        }
    }

    pub async fn flush(&self) -> Result<(), StoreError> {
        match self {
            Store::Memory(_) => Ok(()),
            Store::Sled(store) => store.flush().await,
        }
    }
}

pub fn open_store(config: &Config) -> Result<Store, StoreError> {
    match config.store {
        StoreKind::Memory => {
            info!(max_entries = ?config.max_entries, "Using in-memory store");
            Ok(Store::Memory(Arc::new(MokaStore::new(config.max_entries))))
        }
        StoreKind::Sled => {
            let path = Path::new(&config.data_dir).join(SLED_FILE);
            info!("Using sled store at {}", path.display());
            Ok(Store::Sled(Arc::new(SledStore::open(path)?)))
        }
    }
}
