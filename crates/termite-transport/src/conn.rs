//! Framed connections.
//!
//! Termite has exactly one wire topology: the master binds a listener,
//! workers dial it, and from then on both sides exchange frames over the
//! same socket. There is nothing to configure per connection — frames
//! are small and latency-bound, so Nagle's algorithm is always off, and
//! dials give up after a fixed deadline — so the listener and the
//! connection are the whole surface.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::protocol::{Frame, FrameHeader, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// How long a dial may take before it is abandoned.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts framed connections on a bound address.
pub struct FrameListener {
    inner: TcpListener,
}

impl FrameListener {
    /// Binds to `addr`.
    pub async fn bind(addr: &str) -> Result<Self> {
        Ok(Self {
            inner: TcpListener::bind(addr).await?,
        })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<String> {
        Ok(self.inner.local_addr()?.to_string())
    }

    /// Waits for the next incoming connection.
    pub async fn accept(&self) -> Result<FrameConn> {
        let (stream, addr) = self.inner.accept().await?;
        debug!(peer = %addr, "accepted connection");
        FrameConn::over(stream)
    }
}

/// One framed connection.
///
/// The read and write halves lock independently, so a peer can serve an
/// inbound request while a call of its own is waiting on the wire.
pub struct FrameConn {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    peer_addr: String,
}

impl FrameConn {
    /// Dials `addr`.
    pub async fn dial(addr: &str) -> Result<Self> {
        let stream = match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(TransportError::ConnectionTimeout {
                    addr: addr.to_string(),
                    timeout_ms: DIAL_TIMEOUT.as_millis() as u64,
                })
            }
        };
        debug!(addr, "dialed");
        Self::over(stream)
    }

    fn over(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            peer_addr,
        })
    }

    /// Writes one frame: header first, payload behind it, no
    /// intermediate copy.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        let header = frame.header.encode();
        let mut writer = self.writer.lock().await;
        writer.write_all(&header).await?;
        writer.write_all(&frame.payload).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Reads one frame, rejecting oversized payloads before allocating
    /// and verifying the payload checksum after.
    pub async fn recv(&self) -> Result<Frame> {
        let mut reader = self.reader.lock().await;
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        reader.read_exact(&mut buf).await?;
        let header = FrameHeader::decode(&buf)?;
        if header.payload_length > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: header.payload_length,
                max_size: MAX_PAYLOAD_SIZE,
            });
        }
        let mut payload = vec![0u8; header.payload_length as usize];
        reader.read_exact(&mut payload).await?;
        drop(reader);

        let frame = Frame { header, payload };
        frame.validate()?;
        Ok(frame)
    }

    /// Remote peer address.
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}
