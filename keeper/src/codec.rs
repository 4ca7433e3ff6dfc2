use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::BoxError;
use shared::config::CodecKind;

/// Symmetric value <-> bytes conversion used by the cache backend
///
/// A key written with one codec must be read back with the same codec.
/// The `id` is only consulted when payload tagging is enabled.
pub trait Codec: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn id(&self) -> u8;

    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, BoxError>
    where
        T: Serialize + ?Sized;

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, BoxError>
    where
        T: DeserializeOwned;
}

/// Compact structural binary codec, the default
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn id(&self) -> u8 {
        1
    }

    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, BoxError>
    where
        T: Serialize + ?Sized,
    {
        Ok(bincode::serialize(value)?)
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, BoxError>
    where
        T: DeserializeOwned,
    {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn id(&self) -> u8 {
        2
    }

    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, BoxError>
    where
        T: Serialize + ?Sized,
    {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, BoxError>
    where
        T: DeserializeOwned,
    {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Codec chosen at runtime from configuration
#[derive(Clone, Copy, Debug)]
pub enum ConfiguredCodec {
    Bincode(BincodeCodec),
    Json(JsonCodec),
}

impl From<CodecKind> for ConfiguredCodec {
    fn from(kind: CodecKind) -> Self {
        match kind {
            CodecKind::Bincode => ConfiguredCodec::Bincode(BincodeCodec),
            CodecKind::Json => ConfiguredCodec::Json(JsonCodec),
        }
    }
}

impl Codec for ConfiguredCodec {
    fn name(&self) -> &'static str {
        match self {
            ConfiguredCodec::Bincode(c) => c.name(),
            ConfiguredCodec::Json(c) => c.name(),
        }
    }

    fn id(&self) -> u8 {
        match self {
            ConfiguredCodec::Bincode(c) => c.id(),
            ConfiguredCodec::Json(c) => c.id(),
        }
    }

    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, BoxError>
    where
        T: Serialize + ?Sized,
    {
        match self {
            ConfiguredCodec::Bincode(c) => c.encode(value),
            ConfiguredCodec::Json(c) => c.encode(value),
        }
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, BoxError>
    where
        T: DeserializeOwned,
    {
        match self {
            ConfiguredCodec::Bincode(c) => c.decode(bytes),
            ConfiguredCodec::Json(c) => c.decode(bytes),
        }
    }
}
