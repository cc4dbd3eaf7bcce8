use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::digest::Digest;

/// File mode for committed blobs.
pub(crate) const BLOB_MODE: u32 = 0o444;
/// Prefix for in-progress temp files, kept in the store directory so the
/// final rename stays on one filesystem.
const TMP_PREFIX: &str = ".wr-";

/// Streaming digest sink.
///
/// Bytes written land in a uniquely named temp file while a running
/// SHA-256 is updated. [`HashWriter::sum`] finalizes the digest and
/// commits the temp file to `<dir>/<hex>` by rename. Dropping the writer
/// without calling `sum` discards the temp file.
pub struct HashWriter {
    dir: PathBuf,
    tmp: NamedTempFile,
    hasher: Sha256,
}

impl HashWriter {
    /// Opens a new writer whose blob will be committed into `dir`.
    pub fn new(dir: &Path) -> io::Result<Self> {
        let tmp = tempfile::Builder::new().prefix(TMP_PREFIX).tempfile_in(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            tmp,
            hasher: Sha256::new(),
        })
    }

    /// Finalizes the digest and commits the blob.
    ///
    /// If a blob with the same digest already exists the temp file is
    /// discarded; the existing blob is canonical. Concurrent commits of
    /// the same digest are safe under last-writer-wins rename.
    pub fn sum(mut self) -> io::Result<Digest> {
        self.tmp.flush()?;
        let digest = Digest::from_bytes(self.hasher.finalize().into());
        let target = self.dir.join(digest.to_hex());
        if target.exists() {
            debug!(digest = %digest, "blob already present, dropping temp file");
            return Ok(digest);
        }
        self.tmp.as_file().set_permissions(fs::Permissions::from_mode(BLOB_MODE))?;
        self.tmp.persist(&target).map_err(|e| e.error)?;
        debug!(digest = %digest, "committed blob");
        Ok(digest)
    }
}

impl Write for HashWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.tmp.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tmp.flush()
    }
}
