//! Wire frame header — 64 bytes, little-endian, C-compatible layout.
//!
//! ```text
//! Offset  Size   Field
//! ──────  ─────  ──────────────
//!   0       4    magic           b"WKP1"
//!   4      32    checksum        Blake3 hash of payload
//!  36       4    kind            FrameKind discriminant
//!  40       8    flags           reserved, always 0 for now
//!  48       8    request_id      correlates a response/event to its request
//!  56       8    payload_length  byte count of the payload that follows
//! ──────  ─────  ──────────────
//! Total:  64 bytes
//! ```

use crate::error::WireError;

/// Fixed size of the on-wire header.
pub const HEADER_SIZE: usize = 64;

/// Protocol magic for the current wire version.
pub const MAGIC: [u8; 4] = *b"WKP1";

/// What a frame carries.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Worker → pool, sent once after method registration completes.
    Ready = 0x1,
    /// Pool → worker, requests graceful exit.
    Terminate = 0x2,
    /// Pool → worker, a method invocation.
    Request = 0x3,
    /// Worker → pool, the terminal reply to a `Request`.
    Response = 0x4,
    /// Worker → pool, a mid-task event tied to a still-in-flight request.
    Event = 0x5,
}

impl FrameKind {
    fn from_u32(value: u32) -> Result<Self, WireError> {
        match value {
            0x1 => Ok(Self::Ready),
            0x2 => Ok(Self::Terminate),
            0x3 => Ok(Self::Request),
            0x4 => Ok(Self::Response),
            0x5 => Ok(Self::Event),
            other => Err(WireError::UnknownFrameKind(other)),
        }
    }
}

/// Fixed 64-byte header preceding every frame's JSON payload.
#[derive(Clone)]
pub struct FrameHeader {
    checksum: [u8; 32],
    kind: u32,
    request_id: u64,
    payload_length: u64,
}

impl FrameHeader {
    /// Build a header with a zeroed checksum; callers set it once the
    /// payload is known via [`set_checksum`](Self::set_checksum).
    pub fn new(kind: FrameKind, request_id: u64, payload_length: u64) -> Self {
        Self {
            checksum: [0u8; 32],
            kind: kind as u32,
            request_id,
            payload_length,
        }
    }

    pub fn set_checksum(&mut self, checksum: [u8; 32]) {
        self.checksum = checksum;
    }

    pub fn checksum(&self) -> &[u8; 32] {
        &self.checksum
    }

    pub fn kind(&self) -> Result<FrameKind, WireError> {
        FrameKind::from_u32(self.kind)
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn payload_length(&self) -> u64 {
        self.payload_length
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..36].copy_from_slice(&self.checksum);
        buf[36..40].copy_from_slice(&self.kind.to_le_bytes());
        buf[40..48].copy_from_slice(&0u64.to_le_bytes());
        buf[48..56].copy_from_slice(&self.request_id.to_le_bytes());
        buf[56..64].copy_from_slice(&self.payload_length.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_SIZE {
            return Err(WireError::InvalidHeader("buffer too short for header"));
        }

        let magic: [u8; 4] = bytes[0..4]
            .try_into()
            .map_err(|_| WireError::InvalidHeader("magic slice"))?;
        if magic != MAGIC {
            return Err(WireError::InvalidMagic);
        }

        let checksum: [u8; 32] = bytes[4..36]
            .try_into()
            .map_err(|_| WireError::InvalidHeader("checksum slice"))?;

        let kind = u32::from_le_bytes(
            bytes[36..40]
                .try_into()
                .map_err(|_| WireError::InvalidHeader("kind slice"))?,
        );

        let request_id = u64::from_le_bytes(
            bytes[48..56]
                .try_into()
                .map_err(|_| WireError::InvalidHeader("request_id slice"))?,
        );

        let payload_length = u64::from_le_bytes(
            bytes[56..64]
                .try_into()
                .map_err(|_| WireError::InvalidHeader("payload_length slice"))?,
        );

        Ok(Self {
            checksum,
            kind,
            request_id,
            payload_length,
        })
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("kind", &self.kind())
            .field("request_id", &self.request_id)
            .field("payload_length", &self.payload_length)
            .finish()
    }
}
