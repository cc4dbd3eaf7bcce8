//! Mutual shared-secret handshake.
//!
//! Before any RPC, both ends prove knowledge of the pre-shared secret by
//! exchanging HMAC-SHA256 tags over a pair of fresh nonces. The client
//! hello also carries its origin string, which the server uses to
//! suppress update echo. Any verification failure closes the connection.

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use crate::conn::FrameConn;
use crate::error::{Result, TransportError};
use crate::message::{deserialize_message, serialize_message};
use crate::protocol::{Frame, Opcode};
use crate::secret::SharedSecret;

type HmacSha256 = Hmac<Sha256>;

const SERVER_CONTEXT: &[u8] = b"server";
const CLIENT_CONTEXT: &[u8] = b"client";

#[derive(Debug, Serialize, Deserialize)]
struct AuthHello {
    nonce: [u8; 32],
    origin: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthChallenge {
    nonce: [u8; 32],
    proof: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthProof {
    proof: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthAck {
    ok: bool,
}

fn tag(secret: &SharedSecret, nonce: &[u8; 32], context: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(nonce);
    mac.update(context);
    mac.finalize().into_bytes().to_vec()
}

fn verify(secret: &SharedSecret, nonce: &[u8; 32], context: &[u8], proof: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(nonce);
    mac.update(context);
    mac.verify_slice(proof).is_ok()
}

fn nonce() -> [u8; 32] {
    let mut n = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut n);
    n
}

async fn recv_auth_frame(conn: &FrameConn) -> Result<Frame> {
    let frame = conn.recv().await?;
    if frame.opcode() != Opcode::Auth {
        return Err(TransportError::AuthFailed {
            reason: format!("unexpected {:?} frame during handshake", frame.opcode()),
        });
    }
    Ok(frame)
}

/// Runs the client side of the handshake, announcing `origin`.
pub async fn client_handshake(
    conn: &FrameConn,
    secret: &SharedSecret,
    origin: &str,
) -> Result<()> {
    let client_nonce = nonce();
    let hello = AuthHello {
        nonce: client_nonce,
        origin: origin.to_string(),
    };
    conn.send(&Frame::new(Opcode::Auth, 0, serialize_message(&hello)?))
        .await?;

    let challenge: AuthChallenge = deserialize_message(&recv_auth_frame(conn).await?.payload)?;
    if !verify(secret, &client_nonce, SERVER_CONTEXT, &challenge.proof) {
        return Err(TransportError::AuthFailed {
            reason: "server failed to prove knowledge of the shared secret".to_string(),
        });
    }

    let proof = AuthProof {
        proof: tag(secret, &challenge.nonce, CLIENT_CONTEXT),
    };
    conn.send(&Frame::new(Opcode::Auth, 0, serialize_message(&proof)?))
        .await?;

    let ack: AuthAck = deserialize_message(&recv_auth_frame(conn).await?.payload)?;
    if !ack.ok {
        return Err(TransportError::AuthFailed {
            reason: "server rejected handshake".to_string(),
        });
    }
    debug!(peer = conn.peer_addr(), "handshake complete");
    Ok(())
}

/// Runs the server side of the handshake, returning the client's origin.
pub async fn server_handshake(conn: &FrameConn, secret: &SharedSecret) -> Result<String> {
    let hello: AuthHello = deserialize_message(&recv_auth_frame(conn).await?.payload)?;

    let server_nonce = nonce();
    let challenge = AuthChallenge {
        nonce: server_nonce,
        proof: tag(secret, &hello.nonce, SERVER_CONTEXT),
    };
    conn.send(&Frame::new(Opcode::Auth, 0, serialize_message(&challenge)?))
        .await?;

    let proof: AuthProof = deserialize_message(&recv_auth_frame(conn).await?.payload)?;
    if !verify(secret, &server_nonce, CLIENT_CONTEXT, &proof.proof) {
        // Tell the peer, then fail; the caller drops the connection.
        let _ = conn
            .send(&Frame::new(
                Opcode::Auth,
                0,
                serialize_message(&AuthAck { ok: false })?,
            ))
            .await;
        return Err(TransportError::AuthFailed {
            reason: format!(
                "client {} failed to prove knowledge of the shared secret",
                hello.origin
            ),
        });
    }

    conn.send(&Frame::new(
        Opcode::Auth,
        0,
        serialize_message(&AuthAck { ok: true })?,
    ))
    .await?;
    debug!(peer = conn.peer_addr(), origin = %hello.origin, "handshake complete");
    Ok(hello.origin)
}
