#![warn(missing_docs)]

//! Termite content-addressable storage.
//!
//! Blobs are immutable byte sequences stored under the SHA-256 digest of
//! their contents, as one flat directory of read-only files. A bounded
//! in-memory hot set fronts the disk copy; residency is an optimization
//! and never affects correctness. Missing blobs are pulled from a peer in
//! fixed-size chunks, verified against the requested digest, with
//! concurrent requests for the same digest collapsed onto one transfer.

/// Single-flight coordination of remote fetches.
pub mod coordinator;
/// Content digests and their hex rendering.
pub mod digest;
/// Error types for store and fetch operations.
pub mod error;
/// Chunked blob pull from a peer.
pub mod fetch;
/// On-disk blob store with the in-memory hot set.
pub mod store;
/// Streaming digest sink committing blobs by rename.
pub mod writer;

pub use coordinator::FetchCoordinator;
pub use digest::Digest;
pub use error::{CasError, CasResult};
pub use fetch::{ChunkRequest, ChunkResponse, ChunkSource};
pub use store::{ContentStore, StoreConfig, StoreStats};
pub use writer::HashWriter;
