use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, Metadata};
use std::future::Future;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::{debug, warn};

use termite_attr::attr;
use termite_attr::{AttributeCache, FileAttr, FileMeta, FileNode};
use termite_cas::{CasError, ChunkRequest, ContentStore, Digest};
use termite_transport::message::{deserialize_message, serialize_message};
use termite_transport::{
    AttrRequest, AttrResponse, Frame, Opcode, RpcHandler, RpcPeer, TransportError,
    UpdateRequest, UpdateResponse,
};

/// Per-method call counters.
#[derive(Debug, Default, Clone)]
pub struct ServiceStats {
    /// GetAttr requests served.
    pub getattr_calls: u64,
    /// ServeChunk requests served.
    pub serve_chunk_calls: u64,
    /// Update pushes delivered to workers.
    pub updates_pushed: u64,
}

/// Master-side file service.
///
/// Exports a local tree to workers: `GetAttr` answers with the requested
/// path plus every existing ancestor, `ServeChunk` serves blobs from the
/// master store. Registered workers receive `Update` pushes when job
/// outputs are promoted into the tree.
pub struct FsService {
    root: PathBuf,
    store: Arc<ContentStore>,
    /// Digest memo keyed by tree path, invalidated by (mtime, size).
    digests: Mutex<HashMap<String, (i64, u64, Digest)>>,
    workers: Mutex<Vec<(String, Arc<RpcPeer>)>>,
    stats: Mutex<ServiceStats>,
}

impl FsService {
    /// Creates a service exporting `root`, ingesting file contents into
    /// `store`.
    pub fn new(root: impl Into<PathBuf>, store: Arc<ContentStore>) -> Self {
        Self {
            root: root.into(),
            store,
            digests: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            stats: Mutex::new(ServiceStats::default()),
        }
    }

    /// The master content store.
    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    /// Snapshot of call counters.
    pub fn stats(&self) -> ServiceStats {
        self.lock(&self.stats).clone()
    }

    fn lock<'a, T>(&self, m: &'a Mutex<T>) -> MutexGuard<'a, T> {
        m.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tree_path(&self, vpath: &str) -> PathBuf {
        let rel = vpath.trim_start_matches('/');
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    /// Remembers a worker connection for update pushes. The peer is kept
    /// alive until its connection fails a push.
    pub fn register_worker(&self, origin: impl Into<String>, peer: Arc<RpcPeer>) {
        let origin = origin.into();
        debug!(origin = %origin, "worker registered");
        self.lock(&self.workers).push((origin, peer));
    }

    /// Origins of currently registered workers.
    pub fn worker_origins(&self) -> Vec<String> {
        self.lock(&self.workers)
            .iter()
            .map(|(origin, _)| origin.clone())
            .collect()
    }

    /// Resolves attributes for `path` together with its existing
    /// ancestors, shallowest first. A missing path simply yields fewer
    /// entries; the caller's cache records the absence.
    pub fn get_attrs(&self, path: &str) -> Vec<FileAttr> {
        let path = attr::canonical(path);
        let mut attrs = Vec::new();
        for prefix in prefixes(&path) {
            match self.lstat_attr(&prefix) {
                Ok(Some(entry)) => attrs.push(entry),
                Ok(None) => break,
                Err(e) => {
                    warn!(path = %prefix, error = %e, "stat failed");
                    break;
                }
            }
        }
        attrs
    }

    fn lstat_attr(&self, vpath: &str) -> io::Result<Option<FileAttr>> {
        let fs_path = self.tree_path(vpath);
        let md = match fs::symlink_metadata(&fs_path) {
            Ok(md) => md,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let meta = FileMeta {
            mode: md.mode(),
            size: md.len(),
            mtime: md.mtime(),
            uid: md.uid(),
            gid: md.gid(),
        };
        let file_type = md.file_type();
        if file_type.is_dir() {
            let mut children = BTreeMap::new();
            for entry in fs::read_dir(&fs_path)? {
                let entry = entry?;
                let child_md = fs::symlink_metadata(entry.path())?;
                children.insert(entry.file_name().to_string_lossy().into_owned(), child_md.mode());
            }
            Ok(Some(FileAttr::directory(vpath, meta, children)))
        } else if file_type.is_file() {
            let hash = self.digest_for(vpath, &fs_path, &md)?;
            Ok(Some(FileAttr::regular(vpath, meta, hash)))
        } else if file_type.is_symlink() {
            let target = fs::read_link(&fs_path)?;
            Ok(Some(FileAttr::symlink(
                vpath,
                meta,
                target.to_string_lossy().into_owned(),
            )))
        } else {
            // Devices, fifos, and sockets are not exported.
            Ok(None)
        }
    }

    fn digest_for(&self, vpath: &str, fs_path: &Path, md: &Metadata) -> io::Result<Digest> {
        let key = (md.mtime(), md.len());
        if let Some((mtime, size, digest)) = self.lock(&self.digests).get(vpath) {
            if (*mtime, *size) == key {
                return Ok(*digest);
            }
        }
        let digest = self.store.save_path(fs_path).map_err(cas_to_io)?;
        self.lock(&self.digests)
            .insert(vpath.to_string(), (key.0, key.1, digest));
        Ok(digest)
    }

    /// Pushes an attribute batch to every registered worker except the
    /// named origin (typically the worker whose job produced it).
    pub async fn push_update(&self, files: Vec<FileAttr>, skip_origin: Option<&str>) {
        let peers: Vec<(String, Arc<RpcPeer>)> = self.lock(&self.workers).clone();
        let req = UpdateRequest { files };
        let mut dead = Vec::new();
        for (origin, peer) in peers {
            if skip_origin == Some(origin.as_str()) {
                continue;
            }
            match peer
                .call_message::<UpdateRequest, UpdateResponse>(Opcode::Update, &req)
                .await
            {
                Ok(UpdateResponse {}) => self.lock(&self.stats).updates_pushed += 1,
                Err(e) => {
                    warn!(origin = %origin, error = %e, "update push failed, dropping worker");
                    dead.push(origin);
                }
            }
        }
        if !dead.is_empty() {
            self.lock(&self.workers)
                .retain(|(origin, _)| !dead.contains(origin));
        }
    }

    /// Installs a harvested output batch into the exported tree and
    /// notifies workers.
    ///
    /// Regular files are materialized from the store by copy-then-rename;
    /// blobs referenced by the batch must already be present locally.
    pub async fn promote_outputs(
        &self,
        files: Vec<FileAttr>,
        skip_origin: Option<&str>,
    ) -> io::Result<()> {
        let mut files = files;
        files.sort_by_key(|f| attr::depth(&f.path));
        for file in &files {
            let target = self.tree_path(&file.path);
            match &file.node {
                FileNode::Deleted | FileNode::Absent => {
                    match fs::symlink_metadata(&target) {
                        Ok(md) if md.is_dir() => fs::remove_dir_all(&target)?,
                        Ok(_) => fs::remove_file(&target)?,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e),
                    }
                    debug!(path = %file.path, "removed from tree");
                }
                FileNode::Directory { meta, .. } => {
                    fs::create_dir_all(&target)?;
                    fs::set_permissions(&target, fs::Permissions::from_mode(meta.mode & 0o7777))?;
                }
                FileNode::Regular { meta, hash } => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    let mut blob = File::open(self.store.path(hash))?;
                    let dir = target.parent().unwrap_or(&self.root);
                    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
                    io::copy(&mut blob, tmp.as_file_mut())?;
                    tmp.as_file()
                        .set_permissions(fs::Permissions::from_mode(meta.mode & 0o7777))?;
                    tmp.persist(&target).map_err(|e| e.error)?;
                    debug!(path = %file.path, digest = %hash, "promoted into tree");
                }
                FileNode::Symlink { target: link, .. } => {
                    match fs::remove_file(&target) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e),
                    }
                    std::os::unix::fs::symlink(link, &target)?;
                }
            }
            self.lock(&self.digests).remove(&file.path);
        }
        self.push_update(files, skip_origin).await;
        Ok(())
    }
}

impl RpcHandler for FsService {
    fn handle(
        &self,
        request: Frame,
    ) -> Pin<Box<dyn Future<Output = termite_transport::Result<Vec<u8>>> + Send + '_>> {
        Box::pin(async move {
            match request.opcode() {
                Opcode::GetAttr => {
                    let req: AttrRequest = deserialize_message(&request.payload)?;
                    debug!(path = %req.path, origin = %req.origin, "GetAttr");
                    let attrs = self.get_attrs(&req.path);
                    self.lock(&self.stats).getattr_calls += 1;
                    serialize_message(&AttrResponse { attrs })
                }
                Opcode::ServeChunk => {
                    let req: ChunkRequest = deserialize_message(&request.payload)?;
                    self.lock(&self.stats).serve_chunk_calls += 1;
                    let rep = self
                        .store
                        .serve_chunk(&req)
                        .map_err(|e| TransportError::RemoteError(e.to_string()))?;
                    serialize_message(&rep)
                }
                Opcode::Ping => Ok(Vec::new()),
                other => Err(TransportError::RemoteError(format!(
                    "unsupported method {other:?}"
                ))),
            }
        })
    }
}

/// Worker-side request handler: applies update pushes to the worker's
/// attribute cache.
pub struct WorkerService {
    attrs: OnceLock<Arc<AttributeCache>>,
}

impl WorkerService {
    /// Creates an unbound handler; call [`WorkerService::bind`] once the
    /// attribute cache exists.
    pub fn new() -> Self {
        Self {
            attrs: OnceLock::new(),
        }
    }

    /// Attaches the attribute cache updates apply to.
    pub fn bind(&self, attrs: Arc<AttributeCache>) {
        let _ = self.attrs.set(attrs);
    }
}

impl Default for WorkerService {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcHandler for WorkerService {
    fn handle(
        &self,
        request: Frame,
    ) -> Pin<Box<dyn Future<Output = termite_transport::Result<Vec<u8>>> + Send + '_>> {
        Box::pin(async move {
            match request.opcode() {
                Opcode::Update => {
                    let req: UpdateRequest = deserialize_message(&request.payload)?;
                    debug!(files = req.files.len(), "applying update push");
                    match self.attrs.get() {
                        Some(attrs) => {
                            attrs.update(req.files).await;
                            serialize_message(&UpdateResponse {})
                        }
                        None => Err(TransportError::RemoteError(
                            "update received before cache was bound".to_string(),
                        )),
                    }
                }
                Opcode::Ping => Ok(Vec::new()),
                other => Err(TransportError::RemoteError(format!(
                    "unsupported method {other:?}"
                ))),
            }
        })
    }
}

fn cas_to_io(e: CasError) -> io::Error {
    match e {
        CasError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

/// Prefixes of a canonical path from the root down to the path itself.
fn prefixes(path: &str) -> Vec<String> {
    let mut out = vec!["/".to_string()];
    if path == "/" {
        return out;
    }
    let mut current = String::new();
    for component in path.split('/').filter(|c| !c.is_empty()) {
        current.push('/');
        current.push_str(component);
        out.push(current.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use termite_cas::StoreConfig;

    fn fixture() -> (tempfile::TempDir, FsService) {
        let tmp = tempfile::tempdir().unwrap();
        let tree = tmp.path().join("tree");
        fs::create_dir_all(tree.join("a")).unwrap();
        fs::write(tree.join("a/b.txt"), b"hello").unwrap();
        std::os::unix::fs::symlink("b.txt", tree.join("a/link")).unwrap();
        let store =
            Arc::new(ContentStore::new(StoreConfig::new(tmp.path().join("cache"))).unwrap());
        let service = FsService::new(tree, store);
        (tmp, service)
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(prefixes("/"), vec!["/"]);
        assert_eq!(prefixes("/a/b.txt"), vec!["/", "/a", "/a/b.txt"]);
    }

    #[test]
    fn test_get_attrs_returns_ancestor_chain() {
        let (_tmp, service) = fixture();
        let attrs = service.get_attrs("/a/b.txt");
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[0].path, "/");
        assert_eq!(attrs[1].path, "/a");
        assert_eq!(attrs[2].path, "/a/b.txt");

        let file = &attrs[2];
        assert_eq!(file.hash(), Some(Digest::of(b"hello")));
        assert_eq!(file.meta().unwrap().size, 5);
        // The blob is now in the master store, ready to serve.
        assert!(service.store().has(&Digest::of(b"hello")));

        let dir = &attrs[1];
        let children = dir.children().unwrap();
        assert!(children.contains_key("b.txt"));
        assert!(children.contains_key("link"));
    }

    #[test]
    fn test_get_attrs_missing_path_yields_ancestors_only() {
        let (_tmp, service) = fixture();
        let attrs = service.get_attrs("/a/ghost.txt");
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.last().unwrap().path, "/a");
    }

    #[test]
    fn test_get_attrs_symlink() {
        let (_tmp, service) = fixture();
        let attrs = service.get_attrs("/a/link");
        let link = attrs.last().unwrap();
        assert!(matches!(
            &link.node,
            FileNode::Symlink { target, .. } if target == "b.txt"
        ));
    }

    #[test]
    fn test_digest_memo_avoids_rehashing() {
        let (_tmp, service) = fixture();
        service.get_attrs("/a/b.txt");
        let saves = service.store().stats().saves;
        service.get_attrs("/a/b.txt");
        assert_eq!(service.store().stats().saves, saves);
    }

    #[test]
    fn test_digest_memo_invalidated_by_mtime_or_size() {
        let (tmp, service) = fixture();
        service.get_attrs("/a/b.txt");
        fs::write(tmp.path().join("tree/a/b.txt"), b"changed!").unwrap();
        let attrs = service.get_attrs("/a/b.txt");
        assert_eq!(attrs.last().unwrap().hash(), Some(Digest::of(b"changed!")));
    }

    #[tokio::test]
    async fn test_promote_outputs_materializes_and_deletes() {
        let (tmp, service) = fixture();
        let digest = service.store().save(b"generated").unwrap();
        let batch = vec![
            FileAttr::regular(
                "/out/gen.txt",
                FileMeta {
                    mode: termite_attr::attr::S_IFREG | 0o644,
                    size: 9,
                    mtime: 0,
                    uid: 0,
                    gid: 0,
                },
                digest,
            ),
            FileAttr::directory(
                "/out",
                FileMeta {
                    mode: termite_attr::attr::S_IFDIR | 0o755,
                    size: 4096,
                    mtime: 0,
                    uid: 0,
                    gid: 0,
                },
                BTreeMap::new(),
            ),
            FileAttr::deleted("/a/b.txt"),
        ];
        service.promote_outputs(batch, None).await.unwrap();

        let tree = tmp.path().join("tree");
        assert_eq!(fs::read(tree.join("out/gen.txt")).unwrap(), b"generated");
        assert!(!tree.join("a/b.txt").exists());
        assert!(tree.join("a").exists());
    }
}
