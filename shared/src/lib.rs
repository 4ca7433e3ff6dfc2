// shared/src/lib.rs

use std::fmt;

pub mod config;
pub mod context;

pub use context::Context;

/// Boxed error returned by caller-supplied fallbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Cache operation an error was raised from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Get,
    Set,
    Remove,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Get => f.write_str("get"),
            Op::Set => f.write_str("set"),
            Op::Remove => f.write_str("remove"),
        }
    }
}

/// Step of the serialization pipeline that failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// The store's own record framing around the payload
    Frame,
    Encode,
    Compress,
    Untag,
    Decompress,
    Decode,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Frame => f.write_str("frame"),
            Stage::Encode => f.write_str("encode"),
            Stage::Compress => f.write_str("compress"),
            Stage::Untag => f.write_str("untag"),
            Stage::Decompress => f.write_str("decompress"),
            Stage::Decode => f.write_str("decode"),
        }
    }
}

/// Coarse classification of [`Error`], stable for callers to match on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    StoreCommunication,
    Serialization,
    Deserialization,
    Fallback,
    CacheWrite,
    Cancelled,
    DeadlineExceeded,
    Config,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{op} key {key}: store communication failed: {reason}")]
    StoreCommunication { op: Op, key: String, reason: String },

    #[error("{op} key {key}: {stage} failed: {reason}")]
    Serialization {
        op: Op,
        key: String,
        stage: Stage,
        reason: String,
    },

    #[error("{op} key {key}: {stage} failed: {reason}")]
    Deserialization {
        op: Op,
        key: String,
        stage: Stage,
        reason: String,
    },

    #[error("get key {key}: fallback failed: {source}")]
    Fallback {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("{op} key {key}: store rejected request: {reason}")]
    CacheWrite { op: Op, key: String, reason: String },

    #[error("{op} key {key}: cancelled")]
    Cancelled { op: Op, key: String },

    #[error("{op} key {key}: deadline exceeded")]
    DeadlineExceeded { op: Op, key: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::StoreCommunication { .. } => ErrorKind::StoreCommunication,
            Error::Serialization { .. } => ErrorKind::Serialization,
            Error::Deserialization { .. } => ErrorKind::Deserialization,
            Error::Fallback { .. } => ErrorKind::Fallback,
            Error::CacheWrite { .. } => ErrorKind::CacheWrite,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Key the failing operation was working on, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            Error::StoreCommunication { key, .. }
            | Error::Serialization { key, .. }
            | Error::Deserialization { key, .. }
            | Error::Fallback { key, .. }
            | Error::CacheWrite { key, .. }
            | Error::Cancelled { key, .. }
            | Error::DeadlineExceeded { key, .. } => Some(key),
            Error::Config(_) => None,
        }
    }

    pub fn serialization(op: Op, key: &str, stage: Stage, reason: impl fmt::Display) -> Self {
        Error::Serialization {
            op,
            key: key.to_string(),
            stage,
            reason: reason.to_string(),
        }
    }

    pub fn deserialization(op: Op, key: &str, stage: Stage, reason: impl fmt::Display) -> Self {
        Error::Deserialization {
            op,
            key: key.to_string(),
            stage,
            reason: reason.to_string(),
        }
    }
}

/// Errors reported by a raw key-value store, before operation context is attached
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or the I/O failed
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store received the request and refused or failed it
    #[error("store rejected request: {0}")]
    Rejected(String),
    /// A stored record could not be unframed
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Attach the failing operation and key
    ///
    /// A refused read is still a communication failure from the caller's
    /// point of view; only refused writes and deletes are `CacheWrite`.
    /// A corrupt record is a deserialization failure, never a miss.
    pub fn into_error(self, op: Op, key: &str) -> Error {
        let key = key.to_string();
        match (self, op) {
            (StoreError::Corrupt(reason), _) => Error::Deserialization {
                op,
                key,
                stage: Stage::Frame,
                reason,
            },
            (StoreError::Rejected(reason), Op::Set | Op::Remove) => {
                Error::CacheWrite { op, key, reason }
            }
            (StoreError::Rejected(reason), Op::Get) | (StoreError::Unavailable(reason), _) => {
                Error::StoreCommunication { op, key, reason }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
