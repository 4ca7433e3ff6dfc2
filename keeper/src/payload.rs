use bytes::{BufMut, Bytes, BytesMut};

const MAGIC: u8 = 0x6B;
const VERSION: u8 = 1;
pub const TAG_LEN: usize = 4;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TagError {
    #[error("payload is not tagged")]
    Missing,
    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u8),
    #[error("payload written with codec {found}, expected {expected}")]
    CodecMismatch { expected: u8, found: u8 },
    #[error("payload written with compressor {found}, expected {expected}")]
    CompressorMismatch { expected: u8, found: u8 },
}

/// Codec-version prefix: `[magic][version][codec id][compressor id]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayloadTag {
    codec: u8,
    compressor: u8,
}

impl PayloadTag {
    pub fn new(codec: u8, compressor: u8) -> Self {
        Self { codec, compressor }
    }

    pub fn seal(&self, body: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(TAG_LEN + body.len());
        buf.put_u8(MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(self.codec);
        buf.put_u8(self.compressor);
        buf.put_slice(body);
        buf.freeze()
    }

    /// Validate the prefix and return the body behind it
    pub fn open<'a>(&self, payload: &'a [u8]) -> Result<&'a [u8], TagError> {
        let (header, body) = match payload.split_first_chunk::<TAG_LEN>() {
            Some((header, body)) if header[0] == MAGIC => (header, body),
            _ => return Err(TagError::Missing),
        };

        if header[1] != VERSION {
            return Err(TagError::UnsupportedVersion(header[1]));
        }
        if header[2] != self.codec {
            return Err(TagError::CodecMismatch {
                expected: self.codec,
                found: header[2],
            });
        }
        if header[3] != self.compressor {
            return Err(TagError::CompressorMismatch {
                expected: self.compressor,
                found: header[3],
            });
        }

        Ok(body)
    }
}
