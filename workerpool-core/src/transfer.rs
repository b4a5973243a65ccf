//! Transfer envelope: side-channel binary payloads accompanying a task's
//! params or result.

use serde_json::Value;

/// Wraps a message with a list of raw byte buffers the sender wants
/// transferred alongside it.
///
/// Thread-mode transport genuinely moves these buffers between the pool and
/// the in-process worker task (no copy). Process-mode transport has no way
/// to move ownership across an OS process boundary, so it copies the bytes
/// into the frame payload instead — callers still receive the same bytes,
/// the difference is only in whether the sender's copy is retained.
#[derive(Debug, Clone, Default)]
pub struct Transfer<T> {
    pub message: T,
    pub transferables: Vec<Vec<u8>>,
}

impl<T> Transfer<T> {
    pub fn new(message: T) -> Self {
        Self {
            message,
            transferables: Vec::new(),
        }
    }

    pub fn with_transferables(message: T, transferables: Vec<Vec<u8>>) -> Self {
        Self {
            message,
            transferables,
        }
    }
}

/// A worker method's result, possibly carrying a transfer envelope.
///
/// Plain results are the common case; `Transferred` is produced when a
/// handler explicitly returns a [`Transfer`] to move large buffers without a
/// JSON round-trip through `Value`.
#[derive(Debug, Clone)]
pub enum WorkerOutcome {
    Plain(Value),
    Transferred(Transfer<Value>),
}

impl WorkerOutcome {
    pub fn into_parts(self) -> (Value, Vec<Vec<u8>>) {
        match self {
            Self::Plain(value) => (value, Vec::new()),
            Self::Transferred(transfer) => (transfer.message, transfer.transferables),
        }
    }
}

impl From<Value> for WorkerOutcome {
    fn from(value: Value) -> Self {
        Self::Plain(value)
    }
}

impl From<Transfer<Value>> for WorkerOutcome {
    fn from(transfer: Transfer<Value>) -> Self {
        Self::Transferred(transfer)
    }
}
