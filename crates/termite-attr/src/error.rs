use thiserror::Error;

/// Result type alias for attribute cache operations.
pub type AttrResult<T> = Result<T, AttrError>;

/// Error variants for attribute cache operations.
///
/// Cloneable so one upstream failure can be delivered to every coalesced
/// waiter.
#[derive(Debug, Clone, Error)]
pub enum AttrError {
    /// The miss callback failed to reach the upstream namespace.
    #[error("attribute fetch for {path} failed: {reason}")]
    Upstream {
        /// Path whose attributes were being fetched.
        path: String,
        /// Description of the failure.
        reason: String,
    },
}
