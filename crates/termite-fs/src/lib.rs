#![warn(missing_docs)]

//! Termite remote filesystem.
//!
//! Presents the master's source tree to workers as a read-only view:
//! metadata through the attribute cache, file contents through the
//! content store with chunked remote fetch. Also provides the master
//! side (the file service answering `GetAttr`/`ServeChunk` and pushing
//! updates) and the worker-side overlay harvest that content-addresses
//! job outputs.

/// Filesystem status errors and errno mapping.
pub mod error;
/// Remote filesystem operations.
pub mod fs;
/// Open-file handles backed by memory or the on-disk store.
pub mod handle;
/// Writable-overlay harvest of job outputs.
pub mod overlay;
/// RPC-backed attribute and chunk sources.
pub mod remote;
/// Master file service and worker update handler.
pub mod server;

pub use error::{FsError, FsResult};
pub use fs::{DirEntry, RemoteFs};
pub use handle::{FileHandle, OpenFlags};
pub use overlay::harvest_overlay;
pub use remote::{RemoteAttrSource, RemoteChunkSource};
pub use server::{FsService, ServiceStats, WorkerService};
