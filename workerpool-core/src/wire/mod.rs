//! Wire protocol: frame header, frame bodies, and the tokio-util codec
//! connecting them to a byte stream.

pub mod codec;
pub mod frame;
pub mod header;

pub use codec::WorkerPoolCodec;
pub use frame::{EventBody, Frame, FrameBody, RequestBody, ResponseBody, ResponseOutcome, READY_LITERAL, TERMINATE_METHOD};
pub use header::{FrameHeader, FrameKind, HEADER_SIZE};
