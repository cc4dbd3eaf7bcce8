use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;
use tracing::debug;

use crate::digest::Digest;
use crate::error::CasResult;
use crate::fetch::{ChunkRequest, ChunkResponse};
use crate::writer::HashWriter;

/// Configuration for a [`ContentStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding one `<hex-digest>` file per blob.
    pub cache_dir: PathBuf,
    /// Maximum size of a single blob eligible for the hot set.
    pub mem_max_size: u64,
    /// Aggregate byte bound on the hot set.
    pub hot_set_bytes: u64,
    /// Fetch chunk size in bytes.
    pub chunk_size: usize,
}

impl StoreConfig {
    /// Default configuration rooted at `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            mem_max_size: 1 << 20,
            hot_set_bytes: 64 << 20,
            chunk_size: 1 << 18,
        }
    }
}

/// Store statistics.
#[derive(Debug, Default, Clone)]
pub struct StoreStats {
    /// Hot-set hits.
    pub hits: u64,
    /// Hot-set misses.
    pub misses: u64,
    /// Hot-set evictions.
    pub evictions: u64,
    /// Blobs written to disk by this store.
    pub saves: u64,
    /// Current hot-set size in bytes.
    pub bytes_resident: u64,
}

/// Bounded in-memory residency layer. Disk is canonical; eviction is
/// always safe.
struct HotSet {
    entries: LruCache<Digest, Arc<Vec<u8>>>,
    total_bytes: u64,
    max_bytes: u64,
    entry_max: u64,
    stats: StoreStats,
}

impl HotSet {
    fn new(max_bytes: u64, entry_max: u64) -> Self {
        Self {
            entries: LruCache::unbounded(),
            total_bytes: 0,
            max_bytes,
            entry_max,
            stats: StoreStats::default(),
        }
    }

    fn insert(&mut self, digest: Digest, data: Arc<Vec<u8>>) {
        let size = data.len() as u64;
        if size > self.entry_max || size > self.max_bytes {
            return;
        }
        if let Some(old) = self.entries.pop(&digest) {
            self.total_bytes -= old.len() as u64;
        }
        while self.total_bytes + size > self.max_bytes {
            match self.entries.pop_lru() {
                Some((_, evicted)) => {
                    self.total_bytes -= evicted.len() as u64;
                    self.stats.evictions += 1;
                }
                None => break,
            }
        }
        self.total_bytes += size;
        self.entries.put(digest, data);
        self.stats.bytes_resident = self.total_bytes;
    }

    fn get(&mut self, digest: &Digest) -> Option<Arc<Vec<u8>>> {
        match self.entries.get(digest) {
            Some(data) => {
                self.stats.hits += 1;
                Some(data.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    fn contains(&self, digest: &Digest) -> bool {
        self.entries.contains(digest)
    }
}

/// On-disk content-addressable store fronted by the hot set.
///
/// The mutex guards only the in-memory map; disk and network I/O happen
/// outside it.
pub struct ContentStore {
    config: StoreConfig,
    hot: Mutex<HotSet>,
}

impl ContentStore {
    /// Opens a store, creating the cache directory if needed.
    pub fn new(config: StoreConfig) -> CasResult<Self> {
        fs::create_dir_all(&config.cache_dir)?;
        let hot = HotSet::new(config.hot_set_bytes, config.mem_max_size);
        Ok(Self {
            config,
            hot: Mutex::new(hot),
        })
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn hot(&self) -> MutexGuard<'_, HotSet> {
        self.hot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Absolute path of the on-disk blob. Does not require residency, or
    /// even existence.
    pub fn path(&self, digest: &Digest) -> PathBuf {
        self.config.cache_dir.join(digest.to_hex())
    }

    /// True iff the blob is resident or present on disk.
    pub fn has(&self, digest: &Digest) -> bool {
        if self.hot().contains(digest) {
            return true;
        }
        self.path(digest).exists()
    }

    /// Returns the resident buffer, or `None` without touching disk.
    pub fn contents_if_loaded(&self, digest: &Digest) -> Option<Arc<Vec<u8>>> {
        self.hot().get(digest)
    }

    /// Saves a blob, returning its digest. Idempotent; small blobs also
    /// become resident.
    pub fn save(&self, data: &[u8]) -> CasResult<Digest> {
        let digest = Digest::of(data);
        if !self.path(&digest).exists() {
            let mut w = self.writer()?;
            w.write_all(data)?;
            let written = w.sum()?;
            debug_assert_eq!(written, digest);
            self.hot().stats.saves += 1;
        }
        self.hot().insert(digest, Arc::new(data.to_vec()));
        Ok(digest)
    }

    /// Streams the file at `path` into the store, returning its digest.
    /// The source file is left untouched.
    pub fn save_path(&self, path: &Path) -> CasResult<Digest> {
        let mut src = File::open(path)?;
        let mut w = self.writer()?;
        io::copy(&mut src, &mut w)?;
        let digest = w.sum()?;
        self.hot().stats.saves += 1;
        debug!(digest = %digest, path = %path.display(), "ingested file");
        Ok(digest)
    }

    /// Reads an on-disk blob into the hot set if it is small enough.
    /// Best-effort: errors are swallowed.
    pub fn fault_in(&self, digest: &Digest) {
        if self.hot().contains(digest) {
            return;
        }
        let path = self.path(digest);
        let len = match fs::metadata(&path) {
            Ok(md) => md.len(),
            Err(_) => return,
        };
        if len > self.config.mem_max_size {
            return;
        }
        match fs::read(&path) {
            Ok(data) => self.hot().insert(*digest, Arc::new(data)),
            Err(e) => debug!(digest = %digest, error = %e, "fault-in failed"),
        }
    }

    /// Opens a streaming writer committing into this store.
    pub fn writer(&self) -> io::Result<HashWriter> {
        HashWriter::new(&self.config.cache_dir)
    }

    /// Serves one chunk of a blob to a peer.
    ///
    /// `size` in the response is the full blob length; the chunk covers
    /// `[start, min(end, size))`. A request past end-of-blob yields an
    /// empty chunk and is not an error.
    pub fn serve_chunk(&self, req: &ChunkRequest) -> CasResult<ChunkResponse> {
        if let Some(contents) = self.contents_if_loaded(&req.digest) {
            let size = contents.len() as u64;
            let start = req.start.min(size);
            let end = req.end.min(size).max(start);
            return Ok(ChunkResponse {
                have: true,
                size,
                chunk: contents[start as usize..end as usize].to_vec(),
            });
        }

        let path = self.path(&req.digest);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(ChunkResponse::not_present());
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata()?.len();
        let start = req.start.min(size);
        let end = req.end.min(size).max(start);
        let mut chunk = vec![0u8; (end - start) as usize];
        file.read_exact_at(&mut chunk, start)?;
        Ok(ChunkResponse {
            have: true,
            size,
            chunk,
        })
    }

    /// Snapshot of store statistics.
    pub fn stats(&self) -> StoreStats {
        self.hot().stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> ContentStore {
        ContentStore::new(StoreConfig::new(dir)).unwrap()
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());

        let digest = s.save(b"hello").unwrap();
        assert_eq!(digest, Digest::of(b"hello"));
        assert!(s.has(&digest));
        assert_eq!(fs::read(s.path(&digest)).unwrap(), b"hello");
    }

    #[test]
    fn test_save_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());

        let first = s.save(b"data").unwrap();
        let second = s.save(b"data").unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_hot_set_bound() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::new(dir.path());
        config.hot_set_bytes = 100;
        config.mem_max_size = 100;
        let s = ContentStore::new(config).unwrap();

        let mut digests = Vec::new();
        for i in 0..10u8 {
            digests.push(s.save(&vec![i; 40]).unwrap());
        }

        let stats = s.stats();
        assert!(stats.bytes_resident <= 100);
        assert!(stats.evictions > 0);
        // Evicted blobs remain retrievable from disk.
        for d in &digests {
            assert!(s.has(d));
        }
    }

    #[test]
    fn test_oversize_blob_not_resident() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::new(dir.path());
        config.mem_max_size = 4;
        let s = ContentStore::new(config).unwrap();

        let digest = s.save(b"too large for memory").unwrap();
        assert!(s.contents_if_loaded(&digest).is_none());
        assert!(s.has(&digest));
    }

    #[test]
    fn test_fault_in() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let digest = s.save(b"warm me").unwrap();

        // Simulate eviction by rebuilding the store over the same dir.
        let s = store(dir.path());
        assert!(s.contents_if_loaded(&digest).is_none());
        s.fault_in(&digest);
        assert_eq!(&**s.contents_if_loaded(&digest).unwrap(), b"warm me");
    }

    #[test]
    fn test_fault_in_missing_blob_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.fault_in(&Digest::of(b"never saved"));
    }

    #[test]
    fn test_save_path_preserves_source() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());

        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("out.bin");
        fs::write(&src, b"job output").unwrap();

        let digest = s.save_path(&src).unwrap();
        assert_eq!(digest, Digest::of(b"job output"));
        assert!(s.has(&digest));
        assert!(src.exists());
    }

    #[test]
    fn test_serve_chunk_absent() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let rep = s
            .serve_chunk(&ChunkRequest {
                digest: Digest::of(b"missing"),
                start: 0,
                end: 100,
            })
            .unwrap();
        assert!(!rep.have);
    }

    #[test]
    fn test_serve_chunk_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let digest = s.save(b"0123456789").unwrap();

        let rep = s
            .serve_chunk(&ChunkRequest {
                digest,
                start: 2,
                end: 6,
            })
            .unwrap();
        assert!(rep.have);
        assert_eq!(rep.size, 10);
        assert_eq!(rep.chunk, b"2345");

        // Range past end-of-blob clamps.
        let rep = s
            .serve_chunk(&ChunkRequest {
                digest,
                start: 8,
                end: 100,
            })
            .unwrap();
        assert_eq!(rep.chunk, b"89");

        // Start at or past size yields an empty chunk, not an error.
        let rep = s
            .serve_chunk(&ChunkRequest {
                digest,
                start: 10,
                end: 20,
            })
            .unwrap();
        assert!(rep.have);
        assert_eq!(rep.size, 10);
        assert!(rep.chunk.is_empty());
    }

    #[test]
    fn test_serve_chunk_from_disk_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::new(dir.path());
        config.mem_max_size = 1;
        let s = ContentStore::new(config).unwrap();

        let digest = s.save(b"disk resident only").unwrap();
        assert!(s.contents_if_loaded(&digest).is_none());
        let rep = s
            .serve_chunk(&ChunkRequest {
                digest,
                start: 0,
                end: 4,
            })
            .unwrap();
        assert_eq!(rep.chunk, b"disk");
        assert_eq!(rep.size, 18);
    }
}
