//! Read-through caching for expensive computations.
//!
//! [`Keeper`] checks a [`Cacher`] for a key and only runs the caller's
//! fallback on a miss, storing its result for the TTL the fallback picks.
//! [`StoreCacher`] is the stock backend: it encodes values with a [`Codec`],
//! compresses them with a [`Compressor`], and keeps the payload in any
//! [`KvStore`].

pub mod cacher;
pub mod codec;
pub mod compression;
pub mod keeper;
pub mod payload;
pub mod ports;

#[cfg(test)]
mod test_support;

pub use cacher::{StoreCacher, StoreCacherBuilder};
pub use codec::{BincodeCodec, Codec, ConfiguredCodec, JsonCodec};
pub use compression::{Compressor, Passthrough, ZstdCompressor};
pub use keeper::Keeper;
pub use ports::{Cacher, KvStore};

// Re-export the shared vocabulary so callers need a single dependency
pub use shared::{BoxError, Context, Error, ErrorKind, Op, Result, Stage, StoreError};
