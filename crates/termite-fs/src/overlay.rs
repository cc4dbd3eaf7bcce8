//! Harvest of job outputs from the writable overlay branch.
//!
//! After a job exits, the worker walks its read-write overlay directory.
//! Regular files are content-addressed into the local store and removed
//! from the overlay; directories and symlinks become attribute records;
//! marker files under the reserved deletions directory (each holding one
//! tree path) become deletion entries. The resulting batch is what the
//! master promotes into its tree.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use tracing::{debug, warn};

use termite_attr::attr;
use termite_attr::{FileAttr, FileMeta};
use termite_cas::{CasError, ContentStore};

/// Name of the overlay subdirectory holding deletion markers.
pub const DELETIONS_DIR: &str = "DELETIONS";

/// Walks the overlay at `rw_dir`, ingesting outputs into `store`.
///
/// Ingested regular files are removed from the overlay; the overlay
/// directory skeleton is left behind for the caller to discard with the
/// job sandbox. Paths in the returned batch are relative to the overlay
/// root, slash-prefixed.
pub fn harvest_overlay(rw_dir: &Path, store: &ContentStore) -> io::Result<Vec<FileAttr>> {
    let mut files = Vec::new();

    let deletions = rw_dir.join(DELETIONS_DIR);
    if deletions.is_dir() {
        for entry in fs::read_dir(&deletions)? {
            let entry = entry?;
            let target = fs::read_to_string(entry.path())?;
            let target = attr::canonical(target.trim());
            debug!(path = %target, "harvested deletion");
            files.push(FileAttr::deleted(target));
            fs::remove_file(entry.path())?;
        }
    }

    walk(rw_dir, rw_dir, store, &mut files)?;
    Ok(files)
}

fn walk(
    root: &Path,
    dir: &Path,
    store: &ContentStore,
    out: &mut Vec<FileAttr>,
) -> io::Result<()> {
    let mut subdirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if dir == root && entry.file_name() == DELETIONS_DIR {
            continue;
        }
        let md = fs::symlink_metadata(&path)?;
        let vpath = overlay_path(root, &path);
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
            for child in fs::read_dir(&path)? {
                let child = child?;
                let child_md = fs::symlink_metadata(child.path())?;
                children.insert(child.file_name().to_string_lossy().into_owned(), child_md.mode());
            }
            out.push(FileAttr::directory(vpath, meta, children));
            subdirs.push(path);
        } else if file_type.is_file() {
            let hash = store.save_path(&path).map_err(cas_to_io)?;
            out.push(FileAttr::regular(vpath, meta, hash));
            fs::remove_file(&path)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(&path)?;
            out.push(FileAttr::symlink(
                vpath,
                meta,
                target.to_string_lossy().into_owned(),
            ));
        } else {
            warn!(path = %path.display(), "skipping unsupported file type in overlay");
        }
    }
    for subdir in subdirs {
        walk(root, &subdir, store, out)?;
    }
    Ok(())
}

fn overlay_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    attr::canonical(&rel.to_string_lossy())
}

fn cas_to_io(e: CasError) -> io::Error {
    match e {
        CasError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}
