use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::attr::{self, FileAttr, FileNode};
use crate::error::{AttrError, AttrResult};

/// Miss callback: fetches attributes for one path from upstream.
///
/// The implementation may return contextual entries beyond the requested
/// path (ancestors, siblings); the cache installs all of them as one
/// batch.
#[async_trait]
pub trait AttrSource: Send + Sync {
    /// Fetches attributes for `path`, plus any context the upstream
    /// chooses to include.
    async fn fetch_attrs(&self, path: &str) -> AttrResult<Vec<FileAttr>>;
}

/// Attribute cache statistics.
#[derive(Debug, Default, Clone)]
pub struct AttrCacheStats {
    /// Lookups answered from the table.
    pub hits: u64,
    /// Lookups that went upstream.
    pub misses: u64,
    /// Lookups answered by negative synthesis from a cached parent.
    pub negative_hits: u64,
    /// Lookups that waited on another caller's in-flight miss.
    pub coalesced_waits: u64,
    /// Entries installed by update batches.
    pub updates: u64,
}

struct CacheState {
    entries: HashMap<String, FileAttr>,
    pending: HashMap<String, Vec<oneshot::Sender<AttrResult<()>>>>,
    stats: AttrCacheStats,
}

/// Coherent path-to-attributes cache with single-flight misses.
///
/// Invariants: a cached directory's children map is authoritative (a
/// name not in it is definitely absent); negative and deletion entries
/// are valid hits; whenever an entry is installed, its name is linked
/// into the cached parent's children map and deletions are unlinked, so
/// observers see old or new state, never a mixture.
pub struct AttributeCache {
    state: Mutex<CacheState>,
    source: Arc<dyn AttrSource>,
}

impl AttributeCache {
    /// Creates a cache backed by `source`.
    pub fn new(source: Arc<dyn AttrSource>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                pending: HashMap::new(),
                stats: AttrCacheStats::default(),
            }),
            source,
        }
    }

    /// Looks up one path, going upstream at most once per cold path.
    ///
    /// Negative answers are synthesized locally when a cached parent
    /// proves the path cannot exist.
    pub async fn get(&self, path: &str) -> AttrResult<FileAttr> {
        let path = attr::canonical(path);
        loop {
            let waiting = {
                let mut state = self.state.lock().await;
                if let Some(entry) = state.entries.get(&path).cloned() {
                    state.stats.hits += 1;
                    return Ok(entry);
                }
                if let Some(absent) = Self::synthesize_negative(&state.entries, &path) {
                    state.stats.negative_hits += 1;
                    return Ok(absent);
                }
                match state.pending.get_mut(&path) {
                    Some(waiters) => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        state.stats.coalesced_waits += 1;
                        Some(rx)
                    }
                    None => {
                        state.pending.insert(path.clone(), Vec::new());
                        state.stats.misses += 1;
                        None
                    }
                }
            };

            match waiting {
                Some(rx) => match rx.await {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        return Err(AttrError::Upstream {
                            path,
                            reason: "in-flight fetch canceled".to_string(),
                        })
                    }
                },
                None => break,
            }
        }

        debug!(path = %path, "attribute miss, fetching upstream");
        let fetched = self.source.fetch_attrs(&path).await;

        let mut state = self.state.lock().await;
        let waiters = state.pending.remove(&path).unwrap_or_default();
        match fetched {
            Ok(batch) => {
                Self::apply(&mut state, batch);
                // An upstream answer that never mentions the path means
                // it does not exist; remember that.
                let entry = state
                    .entries
                    .entry(path.clone())
                    .or_insert_with(|| FileAttr::absent(path.clone()))
                    .clone();
                for tx in waiters {
                    let _ = tx.send(Ok(()));
                }
                Ok(entry)
            }
            Err(e) => {
                for tx in waiters {
                    let _ = tx.send(Err(e.clone()));
                }
                Err(e)
            }
        }
    }

    /// Looks up a path expected to be a directory.
    ///
    /// Directory entries always carry their full children map; callers
    /// inspect the returned kind for not-a-directory handling.
    pub async fn get_dir(&self, path: &str) -> AttrResult<FileAttr> {
        self.get(path).await
    }

    /// Atomically installs a batch of attribute records.
    pub async fn update(&self, files: Vec<FileAttr>) {
        let mut state = self.state.lock().await;
        Self::apply(&mut state, files);
    }

    /// Snapshot of cache statistics.
    pub async fn stats(&self) -> AttrCacheStats {
        self.state.lock().await.stats.clone()
    }

    /// Answers a lookup from the parent's authoritative children map.
    fn synthesize_negative(entries: &HashMap<String, FileAttr>, path: &str) -> Option<FileAttr> {
        let parent = attr::parent(path)?;
        let parent_entry = entries.get(parent)?;
        match &parent_entry.node {
            FileNode::Directory { children, .. } => {
                if children.contains_key(attr::base(path)) {
                    None
                } else {
                    Some(FileAttr::absent(path))
                }
            }
            // A parent that is gone, or not a directory, cannot have
            // this child.
            _ => Some(FileAttr::absent(path)),
        }
    }

    /// Installs a batch, shallow paths first so parent links stay
    /// consistent within the batch.
    fn apply(state: &mut CacheState, mut files: Vec<FileAttr>) {
        files.sort_by_key(|f| attr::depth(&f.path));
        for mut file in files {
            file.path = attr::canonical(&file.path);
            let name = attr::base(&file.path).to_string();
            let parent = attr::parent(&file.path).map(str::to_string);
            let present = file.is_present();
            let mode = file.mode();

            debug!(path = %file.path, present, "installing attribute entry");
            state.entries.insert(file.path.clone(), file);
            state.stats.updates += 1;

            if let Some(parent) = parent {
                if let Some(FileAttr {
                    node: FileNode::Directory { children, .. },
                    ..
                }) = state.entries.get_mut(&parent)
                {
                    if present {
                        children.insert(name, mode);
                    } else {
                        children.remove(&name);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::{FileMeta, S_IFDIR, S_IFREG};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use termite_cas::Digest;

    fn meta(mode: u32, size: u64) -> FileMeta {
        FileMeta {
            mode,
            size,
            mtime: 1_700_000_000,
            uid: 1000,
            gid: 1000,
        }
    }

    fn dir_attr(path: &str, names: &[&str]) -> FileAttr {
        let children: BTreeMap<String, u32> = names
            .iter()
            .map(|n| (n.to_string(), S_IFREG | 0o644))
            .collect();
        FileAttr::directory(path, meta(S_IFDIR | 0o755, 4096), children)
    }

    fn file_attr(path: &str, contents: &[u8]) -> FileAttr {
        FileAttr::regular(
            path,
            meta(S_IFREG | 0o644, contents.len() as u64),
            Digest::of(contents),
        )
    }

    /// Upstream serving from a fixed table, counting invocations.
    struct MockSource {
        table: HashMap<String, Vec<FileAttr>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl MockSource {
        fn new(table: HashMap<String, Vec<FileAttr>>) -> Self {
            Self {
                table,
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(0),
            }
        }
    }

    #[async_trait]
    impl AttrSource for MockSource {
        async fn fetch_attrs(&self, path: &str) -> AttrResult<Vec<FileAttr>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.table.get(path).cloned().unwrap_or_default())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl AttrSource for FailingSource {
        async fn fetch_attrs(&self, path: &str) -> AttrResult<Vec<FileAttr>> {
            Err(AttrError::Upstream {
                path: path.to_string(),
                reason: "connection reset".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let mut table = HashMap::new();
        table.insert(
            "/a".to_string(),
            vec![dir_attr("/", &[]), dir_attr("/a", &["b.txt"])],
        );
        let source = Arc::new(MockSource::new(table));
        let cache = AttributeCache::new(source.clone());

        let first = cache.get("/a").await.unwrap();
        assert!(matches!(first.node, FileNode::Directory { .. }));
        let second = cache.get("/a").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_negative_synthesis_from_children() {
        let mut table = HashMap::new();
        table.insert(
            "/dir".to_string(),
            vec![dir_attr("/", &[]), dir_attr("/dir", &["a", "b"])],
        );
        let source = Arc::new(MockSource::new(table));
        let cache = AttributeCache::new(source.clone());

        cache.get_dir("/dir").await.unwrap();
        let missing = cache.get("/dir/c").await.unwrap();
        assert!(matches!(missing.node, FileNode::Absent));
        // The synthetic answer cost no upstream traffic.
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().await.negative_hits, 1);
    }

    #[tokio::test]
    async fn test_child_of_non_directory_is_absent() {
        let cache = AttributeCache::new(Arc::new(FailingSource));
        cache
            .update(vec![dir_attr("/", &["f"]), file_attr("/f", b"data")])
            .await;

        let entry = cache.get("/f/child").await.unwrap();
        assert!(matches!(entry.node, FileNode::Absent));
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce() {
        let mut table = HashMap::new();
        table.insert("/p".to_string(), vec![file_attr("/p", b"contents")]);
        let mut source = MockSource::new(table);
        source.delay = Duration::from_millis(30);
        let source = Arc::new(source);
        let cache = Arc::new(AttributeCache::new(source.clone()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move { cache.get("/p").await }));
        }
        for t in tasks {
            let entry = t.await.unwrap().unwrap();
            assert!(entry.is_present());
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_without_target_caches_absent() {
        let source = Arc::new(MockSource::new(HashMap::new()));
        let cache = AttributeCache::new(source.clone());

        let first = cache.get("/ghost").await.unwrap();
        assert!(matches!(first.node, FileNode::Absent));
        let second = cache.get("/ghost").await.unwrap();
        assert!(matches!(second.node, FileNode::Absent));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upstream_error_propagates_and_allows_retry() {
        let cache = AttributeCache::new(Arc::new(FailingSource));
        assert!(cache.get("/x").await.is_err());
        // The failed miss did not poison the cache.
        assert!(cache.get("/x").await.is_err());
        assert_eq!(cache.stats().await.misses, 2);
    }

    #[tokio::test]
    async fn test_update_deletion_is_atomic() {
        let cache = AttributeCache::new(Arc::new(FailingSource));
        cache
            .update(vec![
                dir_attr("/", &[]),
                dir_attr("/dir", &["a", "b"]),
                file_attr("/dir/a", b"aaa"),
            ])
            .await;

        cache.update(vec![FileAttr::deleted("/dir/a")]).await;

        let entry = cache.get("/dir/a").await.unwrap();
        assert!(matches!(entry.node, FileNode::Deleted));
        let dir = cache.get_dir("/dir").await.unwrap();
        let children = dir.children().unwrap();
        assert!(!children.contains_key("a"));
        assert!(children.contains_key("b"));
    }

    #[tokio::test]
    async fn test_update_links_new_child_into_parent() {
        let cache = AttributeCache::new(Arc::new(FailingSource));
        cache
            .update(vec![dir_attr("/", &[]), dir_attr("/out", &[])])
            .await;

        // A previously missing name is definitely absent...
        let missing = cache.get("/out/result.o").await.unwrap();
        assert!(matches!(missing.node, FileNode::Absent));

        // ...until an update pushes it into existence.
        cache.update(vec![file_attr("/out/result.o", b"obj")]).await;
        let entry = cache.get("/out/result.o").await.unwrap();
        assert!(entry.is_present());
        let dir = cache.get_dir("/out").await.unwrap();
        assert!(dir.children().unwrap().contains_key("result.o"));
    }

    #[tokio::test]
    async fn test_update_applies_shallow_first() {
        let cache = AttributeCache::new(Arc::new(FailingSource));
        // Deliberately deep-first input; the parent link must still form.
        cache
            .update(vec![
                file_attr("/a/b/c.txt", b"deep"),
                dir_attr("/a/b", &[]),
                dir_attr("/a", &[]),
                dir_attr("/", &[]),
            ])
            .await;

        let dir = cache.get_dir("/a/b").await.unwrap();
        assert!(dir.children().unwrap().contains_key("c.txt"));
    }
}
