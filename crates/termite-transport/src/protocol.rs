//! Binary frame protocol.
//!
//! Every message is one frame: a fixed 24-byte header followed by the
//! payload. Payloads are bincode-encoded records; the header carries a
//! CRC-32C of the payload so framing errors surface before decoding.

use crate::error::{Result, TransportError};

/// Frame header size in bytes
/// (magic:4 + version:1 + flags:1 + opcode:2 + request_id:8 + payload_length:4 + checksum:4).
pub const FRAME_HEADER_SIZE: usize = 24;

/// Protocol magic number for frame validation.
pub const MAGIC: u32 = 0x544D_0001;

/// Protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum payload size: one content chunk plus batch headroom.
pub const MAX_PAYLOAD_SIZE: u32 = 8 << 20;

/// Registered methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    /// Shared-secret handshake, exchanged before any other method.
    Auth = 0x0001,
    /// Liveness probe.
    Ping = 0x0002,
    /// Fetch attributes for one path.
    GetAttr = 0x0101,
    /// Serve one chunk of a blob.
    ServeChunk = 0x0201,
    /// Push a batch of attribute records.
    Update = 0x0301,
}

impl Opcode {
    /// Decodes a raw opcode value.
    pub fn from_u16(raw: u16) -> Result<Self> {
        match raw {
            0x0001 => Ok(Opcode::Auth),
            0x0002 => Ok(Opcode::Ping),
            0x0101 => Ok(Opcode::GetAttr),
            0x0201 => Ok(Opcode::ServeChunk),
            0x0301 => Ok(Opcode::Update),
            other => Err(TransportError::UnknownOpcode(other)),
        }
    }
}

/// Frame control flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags {
    /// This frame answers an earlier request with the same id.
    pub response: bool,
    /// No response is expected.
    pub one_way: bool,
    /// Response payload is an error message, not a result record.
    pub error: bool,
}

impl FrameFlags {
    /// Empty flag set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Raw byte representation.
    pub fn as_u8(&self) -> u8 {
        let mut b = 0u8;
        if self.response {
            b |= 0x01;
        }
        if self.one_way {
            b |= 0x02;
        }
        if self.error {
            b |= 0x04;
        }
        b
    }

    /// Decodes the raw byte representation.
    pub fn from_u8(b: u8) -> Self {
        Self {
            response: (b & 0x01) != 0,
            one_way: (b & 0x02) != 0,
            error: (b & 0x04) != 0,
        }
    }
}

/// Frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol magic.
    pub magic: u32,
    /// Protocol version.
    pub version: u8,
    /// Control flags.
    pub flags: FrameFlags,
    /// Method.
    pub opcode: Opcode,
    /// Request id, used to pair responses with calls.
    pub request_id: u64,
    /// Payload length in bytes.
    pub payload_length: u32,
    /// CRC-32C of the payload.
    pub checksum: u32,
}

impl FrameHeader {
    /// Encodes the header into its wire form.
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4] = self.version;
        buf[5] = self.flags.as_u8();
        buf[6..8].copy_from_slice(&(self.opcode as u16).to_be_bytes());
        buf[8..16].copy_from_slice(&self.request_id.to_be_bytes());
        buf[16..20].copy_from_slice(&self.payload_length.to_be_bytes());
        buf[20..24].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }

    /// Decodes and validates a wire header.
    pub fn decode(buf: &[u8; FRAME_HEADER_SIZE]) -> Result<Self> {
        let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != MAGIC {
            return Err(TransportError::InvalidMagic {
                expected: MAGIC,
                got: magic,
            });
        }
        let version = buf[4];
        if version != PROTOCOL_VERSION {
            return Err(TransportError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }
        let flags = FrameFlags::from_u8(buf[5]);
        let opcode = Opcode::from_u16(u16::from_be_bytes([buf[6], buf[7]]))?;
        let request_id = u64::from_be_bytes([
            buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
        ]);
        let payload_length = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);
        let checksum = u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]);
        Ok(Self {
            magic,
            version,
            flags,
            opcode,
            request_id,
            payload_length,
            checksum,
        })
    }
}

/// A single frame: header plus payload.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame header.
    pub header: FrameHeader,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Builds a request frame.
    pub fn new(opcode: Opcode, request_id: u64, payload: Vec<u8>) -> Self {
        Self::with_flags(opcode, request_id, payload, FrameFlags::empty())
    }

    /// Builds a frame with explicit flags.
    pub fn with_flags(opcode: Opcode, request_id: u64, payload: Vec<u8>, flags: FrameFlags) -> Self {
        let header = FrameHeader {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            flags,
            opcode,
            request_id,
            payload_length: payload.len() as u32,
            checksum: crc32c(&payload),
        };
        Self { header, payload }
    }

    /// Builds the response frame for this request.
    pub fn make_response(&self, payload: Vec<u8>) -> Self {
        Self::with_flags(
            self.header.opcode,
            self.header.request_id,
            payload,
            FrameFlags {
                response: true,
                ..FrameFlags::empty()
            },
        )
    }

    /// Builds an error response carrying a message for the caller.
    pub fn make_error_response(&self, message: &str) -> Self {
        Self::with_flags(
            self.header.opcode,
            self.header.request_id,
            message.as_bytes().to_vec(),
            FrameFlags {
                response: true,
                error: true,
                ..FrameFlags::empty()
            },
        )
    }

    /// Method of this frame.
    pub fn opcode(&self) -> Opcode {
        self.header.opcode
    }

    /// Request id of this frame.
    pub fn request_id(&self) -> u64 {
        self.header.request_id
    }

    /// True for response frames.
    pub fn is_response(&self) -> bool {
        self.header.flags.response
    }

    /// Checks payload length and checksum against the header.
    pub fn validate(&self) -> Result<()> {
        if self.payload.len() != self.header.payload_length as usize {
            return Err(TransportError::InvalidFrame {
                reason: format!(
                    "payload length {} does not match header {}",
                    self.payload.len(),
                    self.header.payload_length
                ),
            });
        }
        let computed = crc32c(&self.payload);
        if computed != self.header.checksum {
            return Err(TransportError::ChecksumMismatch {
                expected: self.header.checksum,
                computed,
            });
        }
        Ok(())
    }
}

/// CRC-32C over a byte slice, in bit-serial form.
///
/// Frames top out at one content chunk, so the shift-and-conditional-xor
/// loop is plenty; no lookup table to carry around.
pub fn crc32c(data: &[u8]) -> u32 {
    // Castagnoli polynomial, reflected.
    const CASTAGNOLI: u32 = 0x82F6_3B78;
    let mut state = u32::MAX;
    for &byte in data {
        state ^= byte as u32;
        for _ in 0..8 {
            let feedback = state & 1 != 0;
            state >>= 1;
            if feedback {
                state ^= CASTAGNOLI;
            }
        }
    }
    !state
}
