use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use termite_attr::FileMeta;

use crate::error::FsResult;

/// Access mode requested at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlags {
    /// Read-only access.
    ReadOnly,
    /// Write-only access.
    WriteOnly,
    /// Read-write access.
    ReadWrite,
}

impl OpenFlags {
    /// Decodes the access mode from raw open(2) flag bits.
    pub fn from_bits(flags: i32) -> Self {
        match flags & libc::O_ACCMODE {
            libc::O_WRONLY => OpenFlags::WriteOnly,
            libc::O_RDWR => OpenFlags::ReadWrite,
            _ => OpenFlags::ReadOnly,
        }
    }

    /// True when the mode permits writing.
    pub fn is_writable(&self) -> bool {
        matches!(self, OpenFlags::WriteOnly | OpenFlags::ReadWrite)
    }
}

/// Handle backed by the resident in-memory buffer.
#[derive(Debug)]
pub struct MemoryHandle {
    meta: FileMeta,
    contents: Arc<Vec<u8>>,
}

/// Handle backed by the on-disk blob, opened on first read.
///
/// Deferring the open lets hot files be opened without immediate
/// file-descriptor cost.
#[derive(Debug)]
pub struct LazyDiskHandle {
    meta: FileMeta,
    path: PathBuf,
    file: Mutex<Option<File>>,
}

/// An open read-only file.
#[derive(Debug)]
pub enum FileHandle {
    /// Contents resident in the hot set.
    Memory(MemoryHandle),
    /// Contents on disk in the store.
    Disk(LazyDiskHandle),
}

impl FileHandle {
    /// A handle over a resident buffer.
    pub fn memory(meta: FileMeta, contents: Arc<Vec<u8>>) -> Self {
        FileHandle::Memory(MemoryHandle { meta, contents })
    }

    /// A handle that opens the on-disk blob lazily.
    pub fn lazy_disk(meta: FileMeta, path: PathBuf) -> Self {
        FileHandle::Disk(LazyDiskHandle {
            meta,
            path,
            file: Mutex::new(None),
        })
    }

    /// Reads up to `size` bytes at `offset`; short at end-of-file.
    pub fn read_at(&self, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        match self {
            FileHandle::Memory(h) => {
                let len = h.contents.len() as u64;
                let start = offset.min(len) as usize;
                let end = (offset + size as u64).min(len) as usize;
                Ok(h.contents[start..end].to_vec())
            }
            FileHandle::Disk(h) => {
                let mut guard = h.file.lock().unwrap_or_else(|e| e.into_inner());
                let file = match guard.take() {
                    Some(file) => file,
                    None => File::open(&h.path)?,
                };
                let mut buf = vec![0u8; size as usize];
                let mut filled = 0;
                loop {
                    if filled == buf.len() {
                        break;
                    }
                    let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                buf.truncate(filled);
                *guard = Some(file);
                Ok(buf)
            }
        }
    }

    /// File size in bytes.
    pub fn size(&self) -> u64 {
        self.meta().size
    }

    /// POSIX metadata of the opened file.
    pub fn meta(&self) -> &FileMeta {
        match self {
            FileHandle::Memory(h) => &h.meta,
            FileHandle::Disk(h) => &h.meta,
        }
    }
}
