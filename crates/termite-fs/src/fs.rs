use std::sync::Arc;

use tracing::debug;

use termite_attr::{AttributeCache, FileAttr, FileNode};
use termite_cas::{CasResult, ChunkSource, Digest, FetchCoordinator};

use crate::error::{FsError, FsResult};
use crate::handle::{FileHandle, OpenFlags};

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name.
    pub name: String,
    /// Full mode word.
    pub mode: u32,
}

/// Read-only view of the master's tree.
///
/// Metadata resolves through the attribute cache; regular-file contents
/// resolve through the content store, fetched from the peer at most once
/// per digest. A `getattr` on a regular file starts a background fetch
/// of its contents, so the blob is usually resident by the time the
/// caller follows up with `open`.
#[derive(Clone)]
pub struct RemoteFs {
    attrs: Arc<AttributeCache>,
    fetcher: Arc<FetchCoordinator>,
    chunks: Arc<dyn ChunkSource>,
}

impl RemoteFs {
    /// Builds the view from its collaborators.
    pub fn new(
        attrs: Arc<AttributeCache>,
        fetcher: Arc<FetchCoordinator>,
        chunks: Arc<dyn ChunkSource>,
    ) -> Self {
        Self {
            attrs,
            fetcher,
            chunks,
        }
    }

    /// The attribute cache backing this view.
    pub fn attrs(&self) -> &Arc<AttributeCache> {
        &self.attrs
    }

    async fn fetch_contents(&self, hash: Digest, size: u64) -> CasResult<()> {
        self.fetcher.fetch_once(hash, &*self.chunks).await?;
        let store = self.fetcher.store();
        if size <= store.config().mem_max_size {
            store.fault_in(&hash);
        }
        Ok(())
    }

    /// Resolves attributes. For regular files, starts a fire-and-forget
    /// fetch of the contents to warm the store.
    pub async fn getattr(&self, path: &str) -> FsResult<FileAttr> {
        let entry = self.attrs.get(path).await?;
        if !entry.is_present() {
            return Err(FsError::NotFound);
        }
        if let FileNode::Regular { meta, hash } = &entry.node {
            let this = self.clone();
            let hash = *hash;
            let size = meta.size;
            tokio::spawn(async move {
                if let Err(e) = this.fetch_contents(hash, size).await {
                    debug!(digest = %hash, error = %e, "prefetch failed");
                }
            });
        }
        Ok(entry)
    }

    /// Opens a file for reading. Write access is denied; the view is
    /// read-only.
    pub async fn open(&self, path: &str, flags: OpenFlags) -> FsResult<FileHandle> {
        if flags.is_writable() {
            return Err(FsError::PermissionDenied);
        }
        let entry = self.attrs.get(path).await?;
        match entry.node {
            FileNode::Regular { meta, hash } => {
                self.fetch_contents(hash, meta.size).await?;
                let store = self.fetcher.store();
                match store.contents_if_loaded(&hash) {
                    Some(contents) => Ok(FileHandle::memory(meta, contents)),
                    None => Ok(FileHandle::lazy_disk(meta, store.path(&hash))),
                }
            }
            FileNode::Deleted | FileNode::Absent => Err(FsError::NotFound),
            FileNode::Directory { .. } | FileNode::Symlink { .. } => Err(FsError::InvalidArgument),
        }
    }

    /// Lists a directory as `(name, mode)` pairs.
    pub async fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let entry = self.attrs.get_dir(path).await?;
        match entry.node {
            FileNode::Directory { children, .. } => Ok(children
                .into_iter()
                .map(|(name, mode)| DirEntry { name, mode })
                .collect()),
            FileNode::Deleted | FileNode::Absent => Err(FsError::NotFound),
            FileNode::Regular { .. } | FileNode::Symlink { .. } => Err(FsError::NotADirectory),
        }
    }

    /// Resolves a symlink target.
    pub async fn readlink(&self, path: &str) -> FsResult<String> {
        let entry = self.attrs.get(path).await?;
        match entry.node {
            FileNode::Symlink { target, .. } => Ok(target),
            FileNode::Deleted | FileNode::Absent => Err(FsError::NotFound),
            _ => Err(FsError::InvalidArgument),
        }
    }

    /// Checks accessibility. Write access is always denied.
    pub async fn access(&self, path: &str, mask: u32) -> FsResult<()> {
        if mask & libc::W_OK as u32 != 0 {
            return Err(FsError::PermissionDenied);
        }
        let entry = self.attrs.get(path).await?;
        if entry.is_present() {
            Ok(())
        } else {
            Err(FsError::NotFound)
        }
    }
}
