//! `tokio_util::codec` `Decoder`/`Encoder` implementation for [`Frame`].
//!
//! Header + blake3 checksum + payload, decoded incrementally against
//! whatever `FrameKind` discriminant the header carries.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;
use crate::wire::frame::{EventBody, Frame, FrameBody, ReadyLiteralPayload, RequestBody, ResponseBody};
use crate::wire::header::{FrameHeader, FrameKind, HEADER_SIZE};

/// Refuse to allocate a payload buffer larger than this, guarding against a
/// corrupted length field reserving unbounded memory.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct WorkerPoolCodec {
    /// Header of the frame currently being assembled, once parsed.
    pending_header: Option<FrameHeader>,
}

impl WorkerPoolCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for WorkerPoolCodec {
    type Item = Frame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        let header = match &self.pending_header {
            Some(header) => header.clone(),
            None => {
                if src.len() < HEADER_SIZE {
                    src.reserve(HEADER_SIZE - src.len());
                    return Ok(None);
                }
                let header = FrameHeader::from_bytes(&src[..HEADER_SIZE])?;
                src.advance(HEADER_SIZE);

                let payload_len = header.payload_length() as usize;
                if payload_len > MAX_PAYLOAD_SIZE {
                    return Err(WireError::PayloadTooLarge {
                        actual: header.payload_length(),
                        limit: MAX_PAYLOAD_SIZE as u64,
                    });
                }

                self.pending_header = Some(header.clone());
                header
            }
        };

        let payload_len = header.payload_length() as usize;
        if src.len() < payload_len {
            src.reserve(payload_len - src.len());
            return Ok(None);
        }

        let payload = src.split_to(payload_len).freeze();
        self.pending_header = None;

        if payload_len > 0 {
            let checksum = blake3::hash(&payload);
            if checksum.as_bytes() != header.checksum() {
                return Err(WireError::ChecksumMismatch);
            }
        } else if header.checksum() != &[0u8; 32] {
            return Err(WireError::ChecksumMismatch);
        }

        let kind = header.kind()?;
        let body = match kind {
            FrameKind::Ready => {
                let _: ReadyLiteralPayload = serde_json::from_slice(&payload)?;
                FrameBody::Ready
            }
            FrameKind::Terminate => FrameBody::Terminate,
            FrameKind::Request => {
                let body: RequestBody = serde_json::from_slice(&payload)?;
                FrameBody::Request(body)
            }
            FrameKind::Response => {
                let body: ResponseBody = serde_json::from_slice(&payload)?;
                FrameBody::Response(body)
            }
            FrameKind::Event => {
                let body: EventBody = serde_json::from_slice(&payload)?;
                FrameBody::Event(body)
            }
        };

        Ok(Some(Frame {
            request_id: header.request_id(),
            body,
        }))
    }
}

impl Encoder<Frame> for WorkerPoolCodec {
    type Error = WireError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WireError> {
        let kind = frame.kind();
        let payload = match &frame.body {
            FrameBody::Ready => serde_json::to_vec(&ReadyLiteralPayload::default())?,
            FrameBody::Terminate => Vec::new(),
            FrameBody::Request(body) => serde_json::to_vec(body)?,
            FrameBody::Response(body) => serde_json::to_vec(body)?,
            FrameBody::Event(body) => serde_json::to_vec(body)?,
        };

        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(WireError::PayloadTooLarge {
                actual: payload.len() as u64,
                limit: MAX_PAYLOAD_SIZE as u64,
            });
        }

        let mut header = FrameHeader::new(kind, frame.request_id, payload.len() as u64);
        if !payload.is_empty() {
            header.set_checksum(*blake3::hash(&payload).as_bytes());
        }

        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_slice(&header.to_bytes());
        dst.put_slice(&payload);
        Ok(())
    }
}
