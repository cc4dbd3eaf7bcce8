use thiserror::Error;

use crate::digest::Digest;

/// Result type alias for store and fetch operations.
pub type CasResult<T> = Result<T, CasError>;

/// Error variants for store and fetch operations.
#[derive(Debug, Error)]
pub enum CasError {
    /// Underlying disk error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer does not have the requested blob. Recoverable; the caller
    /// may try another peer.
    #[error("peer does not have blob {digest}")]
    NotPresent {
        /// The digest that was requested.
        digest: Digest,
    },

    /// The connection died or the remote call failed. Recoverable.
    #[error("transport failure fetching {digest}: {reason}")]
    Transport {
        /// The digest being fetched when the transport failed.
        digest: Digest,
        /// Description of the failure.
        reason: String,
    },

    /// Fetched bytes do not hash to the requested digest.
    #[error("content corruption: fetched data hashed to {got}, wanted {want}")]
    Corruption {
        /// Digest of the bytes actually received.
        got: Digest,
        /// Digest that was requested.
        want: Digest,
    },
}

impl CasError {
    /// Duplicates this error for delivery to a coalesced waiter.
    pub(crate) fn duplicate(&self) -> CasError {
        match self {
            CasError::Io(e) => CasError::Io(std::io::Error::new(e.kind(), e.to_string())),
            CasError::NotPresent { digest } => CasError::NotPresent { digest: *digest },
            CasError::Transport { digest, reason } => CasError::Transport {
                digest: *digest,
                reason: reason.clone(),
            },
            CasError::Corruption { got, want } => CasError::Corruption {
                got: *got,
                want: *want,
            },
        }
    }
}
