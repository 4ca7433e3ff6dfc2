//! Length-prefixed TCP protocol for sharing one store between processes.
//!
//! The server exposes any [`keeper::KvStore`]; [`TcpStore`] is the matching
//! client and is itself a `KvStore`, so a remote server can back a
//! [`keeper::StoreCacher`] directly.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::TcpStore;
pub use protocol::{Request, Response};
pub use server::{process_connection, serve};

// Re-export Bytes for convenience
pub use bytes::Bytes;
