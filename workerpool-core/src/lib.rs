//! Shared wire protocol, promise-like `Deferred` handle, and error taxonomy
//! used by both `workerpool-runtime` (the in-executor side) and `workerpool`
//! (the pool scheduler).

pub mod deferred;
pub mod error;
pub mod transfer;
pub mod wire;

pub use deferred::{Deferred, PoolResult, Settler};
pub use error::{ConfigError, PoolError, UserErrorMessage, WireError, WireErrorPayload};
pub use transfer::{Transfer, WorkerOutcome};
pub use wire::{
    EventBody, Frame, FrameBody, FrameHeader, FrameKind, RequestBody, ResponseBody,
    ResponseOutcome, WorkerPoolCodec, HEADER_SIZE, READY_LITERAL, TERMINATE_METHOD,
};
