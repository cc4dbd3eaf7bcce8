//! Symmetric RPC endpoint.
//!
//! One `RpcPeer` wraps an authenticated connection and plays both roles:
//! it issues calls (responses are routed back by request id) and serves
//! inbound requests through a registered handler on spawned tasks. This
//! symmetry is what lets the master push updates down a connection the
//! worker dialed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::conn::FrameConn;
use crate::error::{Result, TransportError};
use crate::message::{deserialize_message, serialize_message};
use crate::protocol::{Frame, FrameFlags, Opcode};

/// Configuration for an RPC peer.
#[derive(Debug, Clone)]
pub struct RpcPeerConfig {
    /// Response timeout in milliseconds.
    pub response_timeout_ms: u64,
}

impl Default for RpcPeerConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 30_000,
        }
    }
}

/// Handler for inbound RPC requests.
pub trait RpcHandler: Send + Sync + 'static {
    /// Handles one request, returning the response payload bytes.
    fn handle(&self, request: Frame) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + '_>>;
}

/// One end of an RPC connection. Cheap to share behind an `Arc`.
pub struct RpcPeer {
    conn: Arc<FrameConn>,
    config: RpcPeerConfig,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Frame>>>>,
    reader: tokio::task::JoinHandle<()>,
}

impl RpcPeer {
    /// Starts a peer over an authenticated connection. Spawns the
    /// background reader immediately.
    pub fn new(conn: FrameConn, handler: Arc<dyn RpcHandler>, config: RpcPeerConfig) -> Self {
        let conn = Arc::new(conn);
        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Frame>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let reader_conn = conn.clone();
        let reader_pending = pending.clone();
        let reader = tokio::spawn(async move {
            loop {
                let frame = match reader_conn.recv().await {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(error = %e, "connection reader stopping");
                        // Fail every outstanding call.
                        reader_pending.lock().await.clear();
                        break;
                    }
                };

                if frame.is_response() {
                    let mut map = reader_pending.lock().await;
                    if let Some(tx) = map.remove(&frame.request_id()) {
                        let _ = tx.send(frame);
                    } else {
                        debug!(request_id = frame.request_id(), "orphan response dropped");
                    }
                    continue;
                }

                let opcode = frame.opcode();
                let request_id = frame.request_id();
                let one_way = frame.header.flags.one_way;
                let handler = handler.clone();
                let conn = reader_conn.clone();
                tokio::spawn(async move {
                    let result = handler.handle(frame).await;
                    if one_way {
                        return;
                    }
                    let response = match result {
                        Ok(payload) => Frame::with_flags(
                            opcode,
                            request_id,
                            payload,
                            FrameFlags {
                                response: true,
                                ..FrameFlags::empty()
                            },
                        ),
                        Err(e) => {
                            warn!(opcode = ?opcode, request_id, error = %e, "handler error");
                            Frame::new(opcode, request_id, Vec::new())
                                .make_error_response(&e.to_string())
                        }
                    };
                    if let Err(e) = conn.send(&response).await {
                        debug!(error = %e, "failed to send response");
                    }
                });
            }
        });

        Self {
            conn,
            config,
            next_id: AtomicU64::new(1),
            pending,
            reader,
        }
    }

    /// Sends a request and waits for its response payload.
    pub async fn call(&self, opcode: Opcode, payload: Vec<u8>) -> Result<Vec<u8>> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::new(opcode, request_id, payload);
        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.pending.lock().await;
            map.insert(request_id, tx);
        }
        if let Err(e) = self.conn.send(&frame).await {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        let timeout = std::time::Duration::from_millis(self.config.response_timeout_ms);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                if response.header.flags.error {
                    Err(TransportError::RemoteError(
                        String::from_utf8_lossy(&response.payload).into_owned(),
                    ))
                } else {
                    Ok(response.payload)
                }
            }
            Ok(Err(_)) => Err(TransportError::ConnectionReset),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(TransportError::RequestTimeout {
                    request_id,
                    timeout_ms: self.config.response_timeout_ms,
                })
            }
        }
    }

    /// Typed call: serializes the request, deserializes the response.
    pub async fn call_message<Req, Rep>(&self, opcode: Opcode, request: &Req) -> Result<Rep>
    where
        Req: Serialize,
        Rep: DeserializeOwned,
    {
        let payload = serialize_message(request)?;
        let response = self.call(opcode, payload).await?;
        deserialize_message(&response)
    }

    /// Remote peer address.
    pub fn peer_addr(&self) -> &str {
        self.conn.peer_addr()
    }

    /// Stops the reader; all outstanding calls fail.
    pub fn shutdown(&self) {
        self.reader.abort();
    }
}

impl Drop for RpcPeer {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
