use shared::config::{CompressionKind, Config};
use std::io;
use std::sync::Arc;

/// Payload compression applied after encoding and before the store write
pub trait Compressor: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn id(&self) -> u8;

    fn compress(&self, input: &[u8]) -> io::Result<Vec<u8>>;

    fn decompress(&self, input: &[u8]) -> io::Result<Vec<u8>>;
}

#[derive(Clone, Copy, Debug)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    pub const DEFAULT_LEVEL: i32 = 3;

    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LEVEL)
    }
}

impl Compressor for ZstdCompressor {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn id(&self) -> u8 {
        1
    }

    fn compress(&self, input: &[u8]) -> io::Result<Vec<u8>> {
        zstd::stream::encode_all(input, self.level)
    }

    fn decompress(&self, input: &[u8]) -> io::Result<Vec<u8>> {
        zstd::stream::decode_all(input)
    }
}

/// Stores encoded bytes as-is
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

impl Compressor for Passthrough {
    fn name(&self) -> &'static str {
        "none"
    }

    fn id(&self) -> u8 {
        0
    }

    fn compress(&self, input: &[u8]) -> io::Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8]) -> io::Result<Vec<u8>> {
        Ok(input.to_vec())
    }
}

pub fn from_config(config: &Config) -> Arc<dyn Compressor> {
    match config.compression {
        CompressionKind::Zstd => Arc::new(ZstdCompressor::new(config.zstd_level)),
        CompressionKind::None => Arc::new(Passthrough),
    }
}
