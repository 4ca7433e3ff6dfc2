use crate::ports::Cacher;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::config::Config;
use shared::{BoxError, Context, Error, Op, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

type InFlight = DashMap<String, Arc<Mutex<()>>>;

/// Read-through cache orchestrator
///
/// `get` tries the cache first and only runs the caller's fallback on a miss,
/// storing its result with the TTL the fallback chose. Concurrent misses on
/// the same key are not coordinated unless [`Keeper::with_coalescing`] is used.
pub struct Keeper<C> {
    cacher: Arc<C>,
    inflight: Option<Arc<InFlight>>,
}

impl<C> Clone for Keeper<C> {
    fn clone(&self) -> Self {
        Self {
            cacher: self.cacher.clone(),
            inflight: self.inflight.clone(),
        }
    }
}

impl<C: Cacher> Keeper<C> {
    pub fn new(cacher: C) -> Self {
        Self::from_shared(Arc::new(cacher))
    }

    pub fn from_shared(cacher: Arc<C>) -> Self {
        Self {
            cacher,
            inflight: None,
        }
    }

    pub fn from_config(cacher: C, config: &Config) -> Self {
        let keeper = Self::new(cacher);
        if config.coalesce {
            keeper.with_coalescing()
        } else {
            keeper
        }
    }

    /// Let concurrent misses on one key share a single fallback run
    ///
    /// Callers queue on a per-key gate; each re-reads the cache once it gets
    /// through, so only the first computes and the rest hit.
    pub fn with_coalescing(mut self) -> Self {
        self.inflight = Some(Arc::new(DashMap::new()));
        self
    }

    pub fn cacher(&self) -> &Arc<C> {
        &self.cacher
    }

    /// Read `key` into `slot`, computing and caching it on a miss
    ///
    /// The value handed back after a miss is re-read from the cache so hits
    /// and misses decode the same way. If the store drops the entry before
    /// that re-read the result is `Ok(false)`.
    pub async fn get<T, V, E, F, Fut>(
        &self,
        ctx: &Context,
        key: &str,
        fallback: F,
        slot: &mut T,
    ) -> Result<bool>
    where
        T: DeserializeOwned + Send,
        V: Serialize + Sync,
        E: Into<BoxError>,
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = std::result::Result<(V, Duration), E>>,
    {
        if self.cacher.get(ctx, key, slot).await? {
            debug!(key, "cache hit");
            return Ok(true);
        }

        let Some(registry) = &self.inflight else {
            debug!(key, "cache miss, running fallback");
            return self.populate(ctx, key, fallback, slot).await;
        };

        let _flight = Flight::join(registry, ctx, key).await?;
        if self.cacher.get(ctx, key, slot).await? {
            debug!(key, "cache hit after waiting on in-flight fallback");
            return Ok(true);
        }

        debug!(key, "cache miss, running coalesced fallback");
        self.populate(ctx, key, fallback, slot).await
    }

    async fn populate<T, V, E, F, Fut>(
        &self,
        ctx: &Context,
        key: &str,
        fallback: F,
        slot: &mut T,
    ) -> Result<bool>
    where
        T: DeserializeOwned + Send,
        V: Serialize + Sync,
        E: Into<BoxError>,
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = std::result::Result<(V, Duration), E>>,
    {
        let (value, ttl) = fallback(ctx.clone()).await.map_err(|e| Error::Fallback {
            key: key.to_string(),
            source: e.into(),
        })?;

        self.cacher.set(ctx, key, &value, ttl).await?;

        let found = self.cacher.get(ctx, key, slot).await?;
        if !found {
            debug!(key, "entry gone before re-read");
        }
        Ok(found)
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.inflight.as_ref().map_or(0, |r| r.len())
    }
}

/// Holder of a key's gate; leaving drops the registry entry once unused
struct Flight {
    registry: Arc<InFlight>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Flight {
    async fn join(registry: &Arc<InFlight>, ctx: &Context, key: &str) -> Result<Self> {
        let gate = registry.entry(key.to_string()).or_default().clone();

        // Constructed before waiting so an aborted wait still cleans up
        let mut flight = Flight {
            registry: registry.clone(),
            key: key.to_string(),
            guard: None,
        };
        flight.guard = Some(ctx.run(Op::Get, key, gate.lock_owned()).await?);
        Ok(flight)
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.registry
            .remove_if(&self.key, |_, gate| Arc::strong_count(gate) == 1);
    }
}
