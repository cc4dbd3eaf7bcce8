use thiserror::Error;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Error variants for the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connect attempt exceeded its deadline.
    #[error("connection timeout after {timeout_ms}ms to {addr}")]
    ConnectionTimeout {
        /// Address that was being dialed.
        addr: String,
        /// Deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The connection closed under an outstanding call.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// Malformed frame.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// What was wrong with it.
        reason: String,
    },

    /// Frame did not start with the protocol magic.
    #[error("invalid magic number: expected 0x{expected:08X}, got 0x{got:08X}")]
    InvalidMagic {
        /// Expected magic value.
        expected: u32,
        /// Value actually read.
        got: u32,
    },

    /// Peer speaks a different protocol version.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Supported version.
        expected: u8,
        /// Version actually read.
        got: u8,
    },

    /// Frame payload failed its checksum.
    #[error("frame checksum mismatch: expected 0x{expected:08X}, computed 0x{computed:08X}")]
    ChecksumMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the payload.
        computed: u32,
    },

    /// Frame payload exceeds the protocol cap.
    #[error("payload too large: {size} bytes (max {max_size})")]
    PayloadTooLarge {
        /// Declared payload size.
        size: u32,
        /// Protocol maximum.
        max_size: u32,
    },

    /// A call went unanswered within its deadline.
    #[error("request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Request that timed out.
        request_id: u64,
        /// Deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Frame carried an opcode this peer does not know.
    #[error("unknown opcode: 0x{0:04X}")]
    UnknownOpcode(u16),

    /// The shared-secret handshake failed.
    #[error("authentication failed: {reason}")]
    AuthFailed {
        /// Why the handshake was rejected.
        reason: String,
    },

    /// The remote handler reported an error.
    #[error("remote error: {0}")]
    RemoteError(String),

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Underlying socket error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
