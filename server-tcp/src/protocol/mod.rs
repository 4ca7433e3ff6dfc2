use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::LengthDelimitedCodec;

// Command type identifiers
pub const CMD_PING: u8 = 0x00;
pub const CMD_PUT: u8 = 0x01;
pub const CMD_GET: u8 = 0x02;
pub const CMD_DELETE: u8 = 0x03;

// Response type identifiers
pub const RESP_PONG: u8 = 0x00;
pub const RESP_OK: u8 = 0x01;
pub const RESP_VALUE: u8 = 0x02;
pub const RESP_NOT_FOUND: u8 = 0x03;
pub const RESP_ERROR: u8 = 0x04;

pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Frame codec shared by server and client: 4-byte big-endian length prefix
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Ping,
    /// `ttl_ms == 0` stores without expiry
    Put { key: String, ttl_ms: u64, value: Bytes },
    Get { key: String },
    Delete { key: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Pong,
    Ok,
    Value { value: Bytes },
    NotFound,
    Error { msg: String },
}

impl Request {
    /// Encode a Request into Bytes for transmission
    ///
    /// Format:
    /// - PING: [0x00]
    /// - PUT: [0x01][key_len: u32][key][ttl_ms: u64][value_len: u32][value]
    /// - GET: [0x02][key_len: u32][key]
    /// - DELETE: [0x03][key_len: u32][key]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Request::Ping => {
                buf.put_u8(CMD_PING);
            }
            Request::Put { key, ttl_ms, value } => {
                buf.put_u8(CMD_PUT);
                put_chunk(&mut buf, key.as_bytes());
                buf.put_u64(*ttl_ms);
                put_chunk(&mut buf, value);
            }
            Request::Get { key } => {
                buf.put_u8(CMD_GET);
                put_chunk(&mut buf, key.as_bytes());
            }
            Request::Delete { key } => {
                buf.put_u8(CMD_DELETE);
                put_chunk(&mut buf, key.as_bytes());
            }
        }

        buf.freeze()
    }

    /// Decode a Request from a complete frame
    ///
    /// Framing is already done by the length-delimited codec, so `buf` holds
    /// exactly one message. Trailing bytes are rejected.
    pub fn decode(mut buf: Bytes) -> Result<Self, String> {
        if buf.is_empty() {
            return Err("Empty buffer".to_string());
        }

        let cmd = buf.get_u8();

        let request = match cmd {
            CMD_PING => Request::Ping,
            CMD_PUT => {
                let key = get_key(&mut buf, "PUT")?;
                if buf.remaining() < 8 {
                    return Err("Invalid PUT: missing ttl".to_string());
                }
                let ttl_ms = buf.get_u64();
                let value = get_chunk(&mut buf, "PUT", "value")?;
                Request::Put { key, ttl_ms, value }
            }
            CMD_GET => Request::Get {
                key: get_key(&mut buf, "GET")?,
            },
            CMD_DELETE => Request::Delete {
                key: get_key(&mut buf, "DELETE")?,
            },
            _ => return Err(format!("Unknown command: 0x{:02X}", cmd)),
        };

        if buf.has_remaining() {
            return Err(format!("{} trailing bytes after request", buf.remaining()));
        }
        Ok(request)
    }
}

impl Response {
    /// Encode a Response into Bytes for transmission
    ///
    /// Format:
    /// - PONG: [0x00]
    /// - OK: [0x01]
    /// - VALUE: [0x02][value_len: u32][value bytes]
    /// - NOT_FOUND: [0x03]
    /// - ERROR: [0x04][msg_len: u32][msg bytes]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Response::Pong => buf.put_u8(RESP_PONG),
            Response::Ok => buf.put_u8(RESP_OK),
            Response::Value { value } => {
                buf.put_u8(RESP_VALUE);
                put_chunk(&mut buf, value);
            }
            Response::NotFound => buf.put_u8(RESP_NOT_FOUND),
            Response::Error { msg } => {
                buf.put_u8(RESP_ERROR);
                put_chunk(&mut buf, msg.as_bytes());
            }
        }

        buf.freeze()
    }

    /// Decode a Response from Bytes received from the network
    pub fn decode(mut buf: Bytes) -> Result<Self, String> {
        if buf.is_empty() {
            return Err("Empty buffer".to_string());
        }

        let resp_type = buf.get_u8();

        match resp_type {
            RESP_PONG => Ok(Response::Pong),
            RESP_OK => Ok(Response::Ok),
            RESP_VALUE => Ok(Response::Value {
                value: get_chunk(&mut buf, "VALUE", "value")?,
            }),
            RESP_NOT_FOUND => Ok(Response::NotFound),
            RESP_ERROR => {
                let msg_bytes = get_chunk(&mut buf, "ERROR", "message")?;
                let msg = String::from_utf8_lossy(&msg_bytes).to_string();
                Ok(Response::Error { msg })
            }
            _ => Err(format!("Unknown response type: 0x{:02X}", resp_type)),
        }
    }
}

fn put_chunk(buf: &mut BytesMut, chunk: &[u8]) {
    buf.put_u32(chunk.len() as u32);
    buf.put_slice(chunk);
}

fn get_chunk(buf: &mut Bytes, msg: &str, field: &str) -> Result<Bytes, String> {
    if buf.remaining() < 4 {
        return Err(format!("Invalid {}: missing {} length", msg, field));
    }
    let len = buf.get_u32() as usize;

    if buf.remaining() < len {
        return Err(format!(
            "Invalid {}: expected {} {} bytes, got {}",
            msg,
            len,
            field,
            buf.remaining()
        ));
    }

    // Zero-copy slice of the frame
    Ok(buf.split_to(len))
}

fn get_key(buf: &mut Bytes, msg: &str) -> Result<String, String> {
    let raw = get_chunk(buf, msg, "key")?;
    String::from_utf8(raw.to_vec()).map_err(|e| format!("Invalid {}: key is not UTF-8: {}", msg, e))
}
