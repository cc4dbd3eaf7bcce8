use thiserror::Error;

use termite_attr::AttrError;
use termite_cas::CasError;

/// Result type alias for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Filesystem statuses surfaced to callers.
///
/// RPC and store errors are translated here and never leak upward.
#[derive(Debug, Error)]
pub enum FsError {
    /// The path does not exist (or was deleted).
    #[error("not found")]
    NotFound,

    /// A directory operation hit a non-directory.
    #[error("not a directory")]
    NotADirectory,

    /// Write access to the read-only view.
    #[error("permission denied")]
    PermissionDenied,

    /// Operation does not apply to this entry kind.
    #[error("invalid argument")]
    InvalidArgument,

    /// Underlying I/O, store, or transport failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl FsError {
    /// The errno value for this status.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::PermissionDenied => libc::EACCES,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::Io(_) => libc::EIO,
        }
    }
}

impl From<AttrError> for FsError {
    fn from(e: AttrError) -> Self {
        FsError::Io(e.to_string())
    }
}

impl From<CasError> for FsError {
    fn from(e: CasError) -> Self {
        FsError::Io(e.to_string())
    }
}

impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        FsError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound.errno(), libc::ENOENT);
        assert_eq!(FsError::NotADirectory.errno(), libc::ENOTDIR);
        assert_eq!(FsError::PermissionDenied.errno(), libc::EACCES);
        assert_eq!(FsError::InvalidArgument.errno(), libc::EINVAL);
        assert_eq!(FsError::Io("disk".to_string()).errno(), libc::EIO);
    }
}
