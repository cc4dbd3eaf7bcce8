//! Pre-shared secret material.

use std::io;
use std::path::Path;

use rand::RngCore;

/// Minimum accepted secret length in bytes.
const MIN_SECRET_LEN: usize = 16;

/// A pre-shared connection secret, zeroed on drop.
pub struct SharedSecret {
    bytes: Vec<u8>,
}

impl SharedSecret {
    /// Wraps raw secret bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Reads the secret from a local file.
    pub fn load(path: &Path) -> io::Result<Self> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < MIN_SECRET_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "secret file {} holds {} bytes, need at least {}",
                    path.display(),
                    bytes.len(),
                    MIN_SECRET_LEN
                ),
            ));
        }
        Ok(Self { bytes })
    }

    /// Generates a fresh random secret.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        for b in self.bytes.iter_mut() {
            *b = 0;
        }
    }
}
