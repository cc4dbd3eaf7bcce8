#![warn(missing_docs)]

//! Termite transport layer.
//!
//! Length-prefixed binary frames over TCP, a mutual shared-secret
//! handshake performed before any RPC, and a symmetric RPC peer: either
//! end of an authenticated connection can issue calls and serve a
//! registered handler, which is how the master pushes attribute updates
//! down worker-initiated connections.

/// Shared-secret connection handshake.
pub mod auth;
/// Framed connections and the listener that accepts them.
pub mod conn;
/// Error types for the transport layer.
pub mod error;
/// RPC payload records and bincode helpers.
pub mod message;
/// Symmetric RPC endpoint over one framed connection.
pub mod peer;
/// Frame layout, opcodes, and validation.
pub mod protocol;
/// Shared secret material.
pub mod secret;

pub use auth::{client_handshake, server_handshake};
pub use conn::{FrameConn, FrameListener};
pub use error::{Result, TransportError};
pub use message::{AttrRequest, AttrResponse, UpdateRequest, UpdateResponse};
pub use peer::{RpcHandler, RpcPeer, RpcPeerConfig};
pub use protocol::{Frame, FrameFlags, Opcode};
pub use secret::SharedSecret;
