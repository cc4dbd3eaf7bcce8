use std::fs;
use std::io::Write;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::digest::Digest;
use crate::error::{CasError, CasResult};
use crate::store::ContentStore;

/// Request for one chunk of a blob.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkRequest {
    /// Digest of the blob being fetched.
    pub digest: Digest,
    /// First byte offset, inclusive.
    pub start: u64,
    /// Last byte offset, exclusive. May reach past end-of-blob.
    pub end: u64,
}

/// One chunk of a blob, or a not-present marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResponse {
    /// Whether the peer has the blob at all.
    pub have: bool,
    /// Full blob length in bytes. Zero when `have` is false.
    pub size: u64,
    /// Bytes `[start, min(end, size))`; shorter than requested at
    /// end-of-blob.
    pub chunk: Vec<u8>,
}

impl ChunkResponse {
    /// Response for a blob the peer does not have.
    pub fn not_present() -> Self {
        Self {
            have: false,
            size: 0,
            chunk: Vec::new(),
        }
    }
}

/// Source of blob chunks, typically a remote peer.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Serves one chunk of the requested blob.
    async fn serve_chunk(&self, req: ChunkRequest) -> CasResult<ChunkResponse>;
}

impl ContentStore {
    /// Pulls one blob from `source` in fixed-size chunks and saves it.
    ///
    /// The computed digest is compared against `want`; on mismatch the
    /// mis-hashed blob is not kept under either digest and `Corruption`
    /// is returned. Callers must not retry a corrupt response.
    pub async fn fetch(&self, want: Digest, source: &dyn ChunkSource) -> CasResult<()> {
        let chunk_size = self.config().chunk_size as u64;
        let request = |start: u64| ChunkRequest {
            digest: want,
            start,
            end: start + chunk_size,
        };

        let first = source.serve_chunk(request(0)).await?;
        if !first.have {
            return Err(CasError::NotPresent { digest: want });
        }

        // A short first chunk is the whole blob; skip the streaming
        // writer and verify before anything touches disk.
        if (first.chunk.len() as u64) < chunk_size {
            let got = Digest::of(&first.chunk);
            if got != want {
                return Err(CasError::Corruption { got, want });
            }
            self.save(&first.chunk)?;
            return Ok(());
        }

        let mut writer = self.writer()?;
        writer.write_all(&first.chunk)?;
        let mut written = first.chunk.len() as u64;
        loop {
            let rep = source.serve_chunk(request(written)).await?;
            if !rep.have {
                // The peer lost the blob mid-transfer.
                return Err(CasError::NotPresent { digest: want });
            }
            writer.write_all(&rep.chunk)?;
            let n = rep.chunk.len() as u64;
            written += n;
            if n < chunk_size {
                break;
            }
        }

        let got = writer.sum()?;
        if got != want {
            let _ = fs::remove_file(self.path(&got));
            return Err(CasError::Corruption { got, want });
        }
        debug!(digest = %want, bytes = written, "fetched blob");
        Ok(())
    }
}
