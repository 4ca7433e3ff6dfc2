use crate::codec::{BincodeCodec, Codec, ConfiguredCodec};
use crate::compression::{self, Compressor, ZstdCompressor};
use crate::payload::PayloadTag;
use crate::ports::{Cacher, KvStore};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::config::Config;
use shared::{Context, Error, Op, Result, Stage};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Storage backend that runs values through encode -> compress on the way
/// into a [`KvStore`] and decompress -> decode on the way out
///
/// Errors are never retried; each one carries the operation and key.
pub struct StoreCacher<C = BincodeCodec> {
    store: Arc<dyn KvStore>,
    codec: C,
    compressor: Arc<dyn Compressor>,
    tag: Option<PayloadTag>,
}

pub struct StoreCacherBuilder<C> {
    store: Arc<dyn KvStore>,
    codec: C,
    compressor: Arc<dyn Compressor>,
    tag_payloads: bool,
}

impl StoreCacher<BincodeCodec> {
    /// Bincode + zstd over `store`, untagged payloads
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::builder(store).build()
    }

    pub fn builder(store: Arc<dyn KvStore>) -> StoreCacherBuilder<BincodeCodec> {
        StoreCacherBuilder {
            store,
            codec: BincodeCodec,
            compressor: Arc::new(ZstdCompressor::default()),
            tag_payloads: false,
        }
    }
}

impl StoreCacher<ConfiguredCodec> {
    /// Build from configuration; a partial or mismatched codec override fails
    pub fn from_config(store: Arc<dyn KvStore>, config: &Config) -> Result<Self> {
        let codec = ConfiguredCodec::from(config.codec()?);
        Ok(StoreCacher::builder(store)
            .codec(codec)
            .compressor_arc(compression::from_config(config))
            .tag_payloads(config.tag_payloads)
            .build())
    }
}

impl<C: Codec> StoreCacherBuilder<C> {
    pub fn codec<D: Codec>(self, codec: D) -> StoreCacherBuilder<D> {
        StoreCacherBuilder {
            store: self.store,
            codec,
            compressor: self.compressor,
            tag_payloads: self.tag_payloads,
        }
    }

    pub fn compressor(self, compressor: impl Compressor) -> Self {
        self.compressor_arc(Arc::new(compressor))
    }

    pub fn compressor_arc(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    /// Prefix payloads with a codec tag that is validated on read
    pub fn tag_payloads(mut self, enabled: bool) -> Self {
        self.tag_payloads = enabled;
        self
    }

    pub fn build(self) -> StoreCacher<C> {
        let tag = self
            .tag_payloads
            .then(|| PayloadTag::new(self.codec.id(), self.compressor.id()));
        StoreCacher {
            store: self.store,
            codec: self.codec,
            compressor: self.compressor,
            tag,
        }
    }
}

impl<C: Codec> StoreCacher<C> {
    /// Read and decode `key`, returning `None` when it is absent
    pub async fn fetch<T>(&self, ctx: &Context, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let payload = ctx
            .run(Op::Get, key, self.store.read(key))
            .await?
            .map_err(|e| e.into_error(Op::Get, key))
            .inspect_err(|e| warn!("{}", e))?;

        match payload {
            Some(payload) => {
                debug!(key, bytes = payload.len(), "cache payload found");
                self.decode_payload(key, &payload).map(Some)
            }
            None => {
                debug!(key, "cache payload absent");
                Ok(None)
            }
        }
    }

    fn encode_payload<T>(&self, key: &str, value: &T) -> Result<Bytes>
    where
        T: Serialize + ?Sized,
    {
        let plain = self
            .codec
            .encode(value)
            .map_err(|e| Error::serialization(Op::Set, key, Stage::Encode, e))?;
        let packed = self
            .compressor
            .compress(&plain)
            .map_err(|e| Error::serialization(Op::Set, key, Stage::Compress, e))?;

        debug!(
            key,
            codec = self.codec.name(),
            compressor = self.compressor.name(),
            plain = plain.len(),
            packed = packed.len(),
            "encoded cache payload"
        );

        Ok(match &self.tag {
            Some(tag) => tag.seal(&packed),
            None => Bytes::from(packed),
        })
    }

    fn decode_payload<T>(&self, key: &str, payload: &[u8]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let result = self.decode_stages(key, payload);
        if let Err(ref e) = result {
            warn!("{}", e);
        }
        result
    }

    fn decode_stages<T>(&self, key: &str, payload: &[u8]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let body = match &self.tag {
            Some(tag) => tag
                .open(payload)
                .map_err(|e| Error::deserialization(Op::Get, key, Stage::Untag, e))?,
            None => payload,
        };
        let plain = self
            .compressor
            .decompress(body)
            .map_err(|e| Error::deserialization(Op::Get, key, Stage::Decompress, e))?;
        self.codec
            .decode(&plain)
            .map_err(|e| Error::deserialization(Op::Get, key, Stage::Decode, e))
    }
}

#[async_trait]
impl<C: Codec> Cacher for StoreCacher<C> {
    async fn get<T>(&self, ctx: &Context, key: &str, slot: &mut T) -> Result<bool>
    where
        T: DeserializeOwned + Send,
    {
        match self.fetch::<T>(ctx, key).await? {
            Some(value) => {
                *slot = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set<T>(&self, ctx: &Context, key: &str, value: &T, ttl: Duration) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let payload = self.encode_payload(key, value).inspect_err(|e| warn!("{}", e))?;

        ctx.run(Op::Set, key, self.store.write(key, payload, ttl))
            .await?
            .map_err(|e| e.into_error(Op::Set, key))
            .inspect_err(|e| warn!("{}", e))?;

        debug!(key, ttl_ms = ttl.as_millis() as u64, "cache entry written");
        Ok(())
    }

    async fn remove(&self, ctx: &Context, key: &str) -> Result<()> {
        ctx.run(Op::Remove, key, self.store.delete(key))
            .await?
            .map_err(|e| e.into_error(Op::Remove, key))
            .inspect_err(|e| warn!("{}", e))?;

        debug!(key, "cache entry removed");
        Ok(())
    }
}

impl<C: Codec + Debug> Debug for StoreCacher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCacher")
            .field("store", &"<dyn KvStore>")
            .field("codec", &self.codec)
            .field("compressor", &self.compressor.name())
            .field("tagged", &self.tag.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::compression::Passthrough;
    use crate::test_support::MapStore;
    use serde::Deserialize;
    use shared::ErrorKind;
    use shared::config::CodecKind;
    use std::sync::atomic::Ordering;

    const HOUR: Duration = Duration::from_secs(3600);

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Offer {
        source: String,
        campaign: String,
        app_id: String,
        category: i32,
        revenue: f64,
    }

    fn offers() -> Vec<Offer> {
        (0..10)
            .map(|i| Offer {
                source: "polymob".to_string(),
                campaign: format!("campaign-{}", i),
                app_id: format!("app-{}", i),
                category: i,
                revenue: i as f64 * 1.5,
            })
            .collect()
    }

    fn cacher() -> (Arc<MapStore>, StoreCacher) {
        let store = Arc::new(MapStore::default());
        (store.clone(), StoreCacher::new(store))
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (_, cacher) = cacher();
        let ctx = Context::background();

        cacher.set(&ctx, "offers", &offers(), HOUR).await.unwrap();

        let mut slot: Vec<Offer> = Vec::new();
        let found = cacher.get(&ctx, "offers", &mut slot).await.unwrap();
        assert!(found);
        assert_eq!(slot, offers());
    }

    #[tokio::test]
    async fn test_payload_is_compressed_not_plain() {
        let (store, cacher) = cacher();
        let ctx = Context::background();

        cacher.set(&ctx, "offers", &offers(), HOUR).await.unwrap();

        let raw = store.raw("offers").unwrap();
        let plain = BincodeCodec.encode(&offers()).unwrap();
        assert_ne!(raw.as_ref(), plain.as_slice());
        // zstd frame magic
        assert_eq!(&raw[..4], &[0x28, 0xb5, 0x2f, 0xfd]);
    }

    #[tokio::test]
    async fn test_get_absent_key_is_not_an_error() {
        let (_, cacher) = cacher();
        let ctx = Context::background();

        let mut slot = 5u64;
        let found = cacher.get(&ctx, "missing", &mut slot).await.unwrap();
        assert!(!found);
        assert_eq!(slot, 5, "slot untouched on a miss");

        let fetched: Option<u64> = cacher.fetch(&ctx, "missing").await.unwrap();
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let (_, cacher) = cacher();
        let ctx = Context::background();

        cacher.set(&ctx, "a", &42i64, HOUR).await.unwrap();
        cacher.remove(&ctx, "a").await.unwrap();

        let mut slot = 0i64;
        assert!(!cacher.get(&ctx, "a", &mut slot).await.unwrap());

        // Removing again is fine
        cacher.remove(&ctx, "a").await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_payload_is_a_decompress_error() {
        let (store, cacher) = cacher();
        let ctx = Context::background();

        store.put_raw("a", b"garbage bytes written behind our back");

        let mut slot = 0i64;
        let err = cacher.get(&ctx, "a", &mut slot).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Deserialization);
        assert!(matches!(
            err,
            Error::Deserialization {
                stage: Stage::Decompress,
                op: Op::Get,
                ..
            }
        ));
        assert_eq!(slot, 0);
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_a_decode_error() {
        let store = Arc::new(MapStore::default());
        let cacher = StoreCacher::builder(store).codec(JsonCodec).build();
        let ctx = Context::background();

        cacher.set(&ctx, "a", "a string", HOUR).await.unwrap();

        let mut slot = Offer::default();
        let err = cacher.get(&ctx, "a", &mut slot).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Deserialization {
                stage: Stage::Decode,
                ..
            }
        ));
        assert_eq!(err.key(), Some("a"));
    }

    #[tokio::test]
    async fn test_store_failures_are_classified() {
        let (store, cacher) = cacher();
        let ctx = Context::background();

        store.reject_writes.store(true, Ordering::SeqCst);
        let err = cacher.set(&ctx, "a", &1u8, HOUR).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CacheWrite);

        store.unavailable.store(true, Ordering::SeqCst);
        let mut slot = 0u8;
        let err = cacher.get(&ctx, "a", &mut slot).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreCommunication);
        assert!(err.to_string().starts_with("get key a:"));

        let err = cacher.remove(&ctx, "a").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreCommunication);
    }

    #[tokio::test]
    async fn test_encode_failure_never_reaches_store() {
        let (store, cacher) = cacher();
        let ctx = Context::background();

        // bincode cannot encode sequences of unknown length
        struct UnknownLength;
        impl Serialize for UnknownLength {
            fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
                use serde::ser::SerializeSeq;
                let seq = s.serialize_seq(None)?;
                seq.end()
            }
        }

        let err = cacher.set(&ctx, "a", &UnknownLength, HOUR).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Serialization {
                stage: Stage::Encode,
                op: Op::Set,
                ..
            }
        ));
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_context_aborts_store_call() {
        let (store, cacher) = cacher();
        let ctx = Context::background();
        ctx.cancel();

        let err = cacher.set(&ctx, "a", &1u8, HOUR).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_slow_read() {
        let store = Arc::new(MapStore::slow(Duration::from_secs(5)));
        let cacher = StoreCacher::new(store);
        let ctx = Context::background().with_timeout(Duration::from_millis(100));

        let mut slot = 0u8;
        let err = cacher.get(&ctx, "a", &mut slot).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_tagged_payloads_detect_codec_switch() {
        let store = Arc::new(MapStore::default());
        let ctx = Context::background();

        let bincode = StoreCacher::builder(store.clone()).tag_payloads(true).build();
        bincode.set(&ctx, "a", &7u32, HOUR).await.unwrap();

        let mut slot = 0u32;
        assert!(bincode.get(&ctx, "a", &mut slot).await.unwrap());
        assert_eq!(slot, 7);

        let json = StoreCacher::builder(store.clone())
            .codec(JsonCodec)
            .tag_payloads(true)
            .build();
        let err = json.get(&ctx, "a", &mut slot).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Deserialization {
                stage: Stage::Untag,
                ..
            }
        ));

        // Untagged payloads are rejected by a tagging reader
        let untagged = StoreCacher::new(store.clone());
        untagged.set(&ctx, "b", &7u32, HOUR).await.unwrap();
        let err = bincode.get(&ctx, "b", &mut slot).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Deserialization);
    }

    #[tokio::test]
    async fn test_passthrough_compressor() {
        let store = Arc::new(MapStore::default());
        let cacher = StoreCacher::builder(store.clone())
            .codec(JsonCodec)
            .compressor(Passthrough)
            .build();
        let ctx = Context::background();

        cacher.set(&ctx, "a", &[1, 2, 3], HOUR).await.unwrap();
        assert_eq!(store.raw("a").unwrap().as_ref(), b"[1,2,3]");
    }

    #[tokio::test]
    async fn test_from_config() {
        let store: Arc<dyn KvStore> = Arc::new(MapStore::default());
        let ctx = Context::background();

        let mut config = Config::default();
        config.encoder = Some(CodecKind::Json);
        config.decoder = Some(CodecKind::Json);
        let cacher = StoreCacher::from_config(store.clone(), &config).unwrap();
        cacher.set(&ctx, "a", "hello", HOUR).await.unwrap();
        let value: Option<String> = cacher.fetch(&ctx, "a").await.unwrap();
        assert_eq!(value.as_deref(), Some("hello"));

        config.decoder = None;
        let err = StoreCacher::from_config(store, &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
