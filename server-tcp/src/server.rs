use crate::protocol::{Request, Response, frame_codec};
use futures::{SinkExt, StreamExt};
use keeper::KvStore;
use shared::BoxError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// Serve one client until it disconnects
pub async fn process_connection(
    socket: TcpStream,
    store: Arc<dyn KvStore>,
) -> Result<(), BoxError> {
    socket.set_nodelay(true).ok();

    let mut framed = Framed::new(socket, frame_codec());

    while let Some(frame_result) = framed.next().await {
        let frame = frame_result?;

        let request = match Request::decode(frame.freeze()) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to decode request: {}", e);
                framed.send(Response::Error { msg: e }.encode()).await?;
                continue;
            }
        };

        debug!("Received request: {:?}", request);

        let response = handle(store.as_ref(), request).await;
        framed.send(response.encode()).await?;
    }

    Ok(())
}

async fn handle(store: &dyn KvStore, request: Request) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::Put { key, ttl_ms, value } => {
            match store.write(&key, value, Duration::from_millis(ttl_ms)).await {
                Ok(()) => Response::Ok,
                Err(e) => Response::Error {
                    msg: format!("Put failed: {}", e),
                },
            }
        }

        Request::Get { key } => match store.read(&key).await {
            Ok(Some(value)) => Response::Value { value },
            Ok(None) => Response::NotFound,
            Err(e) => Response::Error {
                msg: format!("Get failed: {}", e),
            },
        },

        Request::Delete { key } => match store.delete(&key).await {
            Ok(()) => Response::Ok,
            Err(e) => Response::Error {
                msg: format!("Delete failed: {}", e),
            },
        },
    }
}

/// Accept connections until `shutdown` resolves
///
/// Connections already being served keep running on their own tasks.
pub async fn serve<F>(
    listener: TcpListener,
    store: Arc<dyn KvStore>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    if let Ok(addr) = listener.local_addr() {
        info!("TCP Server listening on tcp://{}", addr);
    }

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (socket, addr) = match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!("Accept failed: {err}");
                        continue;
                    }
                };

                let store = store.clone();
                tokio::spawn(async move {
                    debug!("Connection {addr} successful.");

                    if let Err(err) = process_connection(socket, store).await {
                        warn!("Connection {addr} error: {err:?}");
                    }
                });
            }
        }
    }
}
