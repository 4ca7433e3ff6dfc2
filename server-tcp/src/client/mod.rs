use crate::protocol::{MAX_FRAME_LENGTH, Request, Response, frame_codec};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use keeper::KvStore;
use shared::StoreError;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, warn};

type Connection = Framed<TcpStream, LengthDelimitedCodec>;

/// [`KvStore`] backed by a remote `server-tcp` instance
///
/// Requests share one connection and run one at a time. The connection is
/// opened on first use and reopened after any failure. A request abandoned
/// mid-flight (its future dropped) takes the connection with it, so a late
/// reply can never be read as the answer to the next request.
pub struct TcpStore {
    addr: String,
    conn: Mutex<Option<Connection>>,
}

impl TcpStore {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: Mutex::new(None),
        }
    }

    /// Connect eagerly so a bad address fails at startup
    pub async fn connect(addr: impl Into<String>) -> Result<Self, StoreError> {
        let store = Self::new(addr);
        let conn = store.open().await?;
        *store.conn.lock().await = Some(conn);
        Ok(store)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        match self.round_trip(Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn open(&self) -> Result<Connection, StoreError> {
        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            StoreError::Unavailable(format!("Failed to connect to {}: {}", self.addr, e))
        })?;
        stream.set_nodelay(true).ok();
        debug!("Connected to tcp://{}", self.addr);
        Ok(Framed::new(stream, frame_codec()))
    }

    async fn round_trip(&self, request: Request) -> Result<Response, StoreError> {
        // The frame encoder would fail mid-send and cost us the connection
        let frame = request.encode();
        if frame.len() > MAX_FRAME_LENGTH {
            return Err(StoreError::Rejected(format!(
                "request of {} bytes exceeds the {} byte frame limit",
                frame.len(),
                MAX_FRAME_LENGTH
            )));
        }

        let mut slot = self.conn.lock().await;

        // Taken out for the duration of the exchange; only a clean exchange
        // puts it back
        let mut framed = match slot.take() {
            Some(conn) => conn,
            None => self.open().await?,
        };

        framed
            .send(frame)
            .await
            .map_err(|e| io_failure(&self.addr, e))?;

        let frame = framed
            .next()
            .await
            .ok_or_else(|| {
                StoreError::Unavailable(format!("Connection to {} closed by server", self.addr))
            })?
            .map_err(|e| io_failure(&self.addr, e))?;

        let response = Response::decode(frame.freeze()).map_err(|e| {
            warn!("Undecodable response from {}: {}", self.addr, e);
            StoreError::Unavailable(format!("Invalid response: {}", e))
        })?;

        *slot = Some(framed);
        Ok(response)
    }
}

#[async_trait]
impl KvStore for TcpStore {
    async fn read(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let request = Request::Get {
            key: key.to_string(),
        };
        match self.round_trip(request).await? {
            Response::Value { value } => Ok(Some(value)),
            Response::NotFound => Ok(None),
            Response::Error { msg } => Err(StoreError::Rejected(msg)),
            other => Err(unexpected(other)),
        }
    }

    async fn write(&self, key: &str, payload: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let request = Request::Put {
            key: key.to_string(),
            ttl_ms: ttl_to_millis(ttl),
            value: payload,
        };
        match self.round_trip(request).await? {
            Response::Ok => Ok(()),
            Response::Error { msg } => Err(StoreError::Rejected(msg)),
            other => Err(unexpected(other)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let request = Request::Delete {
            key: key.to_string(),
        };
        match self.round_trip(request).await? {
            Response::Ok => Ok(()),
            Response::Error { msg } => Err(StoreError::Rejected(msg)),
            other => Err(unexpected(other)),
        }
    }
}

impl std::fmt::Debug for TcpStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpStore").field("addr", &self.addr).finish()
    }
}

// Zero stays "no expiry"; anything shorter than a millisecond rounds up
fn ttl_to_millis(ttl: Duration) -> u64 {
    if ttl.is_zero() {
        return 0;
    }
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn io_failure(addr: &str, e: std::io::Error) -> StoreError {
    StoreError::Unavailable(format!("I/O error talking to {}: {}", addr, e))
}

fn unexpected(response: Response) -> StoreError {
    StoreError::Unavailable(format!("Unexpected response: {:?}", response))
}
