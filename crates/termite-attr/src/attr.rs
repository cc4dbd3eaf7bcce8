use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use termite_cas::Digest;

/// File-type mask within a mode word.
pub const S_IFMT: u32 = 0o170000;
/// Directory type bits.
pub const S_IFDIR: u32 = 0o040000;
/// Regular-file type bits.
pub const S_IFREG: u32 = 0o100000;
/// Symlink type bits.
pub const S_IFLNK: u32 = 0o120000;

/// POSIX metadata shared by all present entry kinds.
///
/// `mode` carries full type-plus-permission bits, so children maps and
/// directory listings are self-describing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Full mode word (type and permission bits).
    pub mode: u32,
    /// Size in bytes.
    pub size: u64,
    /// Modification time, seconds since the epoch.
    pub mtime: i64,
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
}

/// What a path is, with exactly the fields its kind allows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FileNode {
    /// Regular file; `hash` addresses its contents in the blob store.
    Regular {
        /// POSIX metadata.
        meta: FileMeta,
        /// Content digest.
        hash: Digest,
    },
    /// Directory; `children` enumerates it exactly (name to mode).
    Directory {
        /// POSIX metadata.
        meta: FileMeta,
        /// Complete child listing.
        children: BTreeMap<String, u32>,
    },
    /// Symbolic link to `target`.
    Symlink {
        /// POSIX metadata.
        meta: FileMeta,
        /// Link target.
        target: String,
    },
    /// The path existed and was deleted.
    Deleted,
    /// The path is known not to exist.
    Absent,
}

/// Attributes of one path in the remote namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAttr {
    /// Canonical absolute path.
    pub path: String,
    /// Kind and metadata.
    pub node: FileNode,
}

impl FileAttr {
    /// A regular file entry.
    pub fn regular(path: impl Into<String>, meta: FileMeta, hash: Digest) -> Self {
        Self {
            path: path.into(),
            node: FileNode::Regular { meta, hash },
        }
    }

    /// A directory entry with its full child listing.
    pub fn directory(
        path: impl Into<String>,
        meta: FileMeta,
        children: BTreeMap<String, u32>,
    ) -> Self {
        Self {
            path: path.into(),
            node: FileNode::Directory { meta, children },
        }
    }

    /// A symlink entry.
    pub fn symlink(path: impl Into<String>, meta: FileMeta, target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            node: FileNode::Symlink {
                meta,
                target: target.into(),
            },
        }
    }

    /// A deletion entry.
    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            node: FileNode::Deleted,
        }
    }

    /// A negative entry for a path known not to exist.
    pub fn absent(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            node: FileNode::Absent,
        }
    }

    /// True for entries describing an existing file, directory, or link.
    pub fn is_present(&self) -> bool {
        !matches!(self.node, FileNode::Deleted | FileNode::Absent)
    }

    /// POSIX metadata, when present.
    pub fn meta(&self) -> Option<&FileMeta> {
        match &self.node {
            FileNode::Regular { meta, .. }
            | FileNode::Directory { meta, .. }
            | FileNode::Symlink { meta, .. } => Some(meta),
            FileNode::Deleted | FileNode::Absent => None,
        }
    }

    /// Content digest, present iff this is a regular file.
    pub fn hash(&self) -> Option<Digest> {
        match &self.node {
            FileNode::Regular { hash, .. } => Some(*hash),
            _ => None,
        }
    }

    /// Child listing, present iff this is a directory.
    pub fn children(&self) -> Option<&BTreeMap<String, u32>> {
        match &self.node {
            FileNode::Directory { children, .. } => Some(children),
            _ => None,
        }
    }

    /// Full mode word, zero for deleted and absent entries.
    pub fn mode(&self) -> u32 {
        self.meta().map(|m| m.mode).unwrap_or(0)
    }
}

/// Normalizes a path to canonical absolute form: leading slash, no
/// trailing slash, `"/"` for the root.
pub fn canonical(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Parent of a canonical path; `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Final component of a canonical path; empty for the root.
pub fn base(path: &str) -> &str {
    if path == "/" {
        return "";
    }
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Component count of a canonical path; zero for the root.
pub fn depth(path: &str) -> usize {
    if path == "/" {
        0
    } else {
        path.matches('/').count()
    }
}
