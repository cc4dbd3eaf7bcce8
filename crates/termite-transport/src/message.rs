//! RPC payload records.
//!
//! Payloads are bincode-encoded. `ServeChunk` reuses the chunk
//! request/response records defined alongside the content store.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use termite_attr::FileAttr;

use crate::error::{Result, TransportError};

/// ServeChunk request/response records, defined next to the store they
/// serve from.
pub use termite_cas::{ChunkRequest, ChunkResponse};

/// Serializes an RPC payload.
pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| TransportError::Serialization(e.to_string()))
}

/// Deserializes an RPC payload.
pub fn deserialize_message<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    bincode::deserialize(data).map_err(|e| TransportError::Serialization(e.to_string()))
}

/// GetAttr request: fetch attributes for one path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrRequest {
    /// Canonical absolute path being looked up.
    pub path: String,
    /// Requester identity, used to suppress update echo.
    pub origin: String,
}

/// GetAttr response.
///
/// Contains the requested path when it exists, plus whatever contextual
/// entries (ancestors, siblings) the server chooses to include; the
/// client installs all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrResponse {
    /// Attribute records to install.
    pub attrs: Vec<FileAttr>,
}

/// Update push: install fresh attribute records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Attribute records superseding cached ones.
    pub files: Vec<FileAttr>,
}

/// Update response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResponse {}
