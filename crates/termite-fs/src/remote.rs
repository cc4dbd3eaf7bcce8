use std::sync::Arc;

use async_trait::async_trait;

use termite_attr::{AttrError, AttrResult, AttrSource, FileAttr};
use termite_cas::{CasError, CasResult, ChunkRequest, ChunkResponse, ChunkSource};
use termite_transport::{AttrRequest, AttrResponse, Opcode, RpcPeer};

/// Chunk source pulling blobs from a peer's `ServeChunk` method.
pub struct RemoteChunkSource {
    peer: Arc<RpcPeer>,
}

impl RemoteChunkSource {
    /// Wraps an authenticated peer.
    pub fn new(peer: Arc<RpcPeer>) -> Self {
        Self { peer }
    }
}

#[async_trait]
impl ChunkSource for RemoteChunkSource {
    async fn serve_chunk(&self, req: ChunkRequest) -> CasResult<ChunkResponse> {
        self.peer
            .call_message(Opcode::ServeChunk, &req)
            .await
            .map_err(|e| CasError::Transport {
                digest: req.digest,
                reason: e.to_string(),
            })
    }
}

/// Attribute source resolving misses through a peer's `GetAttr` method.
pub struct RemoteAttrSource {
    peer: Arc<RpcPeer>,
    origin: String,
}

impl RemoteAttrSource {
    /// Wraps an authenticated peer; `origin` identifies this worker so
    /// the master can suppress update echo.
    pub fn new(peer: Arc<RpcPeer>, origin: impl Into<String>) -> Self {
        Self {
            peer,
            origin: origin.into(),
        }
    }
}

#[async_trait]
impl AttrSource for RemoteAttrSource {
    async fn fetch_attrs(&self, path: &str) -> AttrResult<Vec<FileAttr>> {
        let req = AttrRequest {
            path: path.to_string(),
            origin: self.origin.clone(),
        };
        let rep: AttrResponse = self
            .peer
            .call_message(Opcode::GetAttr, &req)
            .await
            .map_err(|e| AttrError::Upstream {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(rep.attrs)
    }
}
