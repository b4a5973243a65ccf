//! A unit of work submitted via [`crate::Pool::exec`].

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use workerpool_core::Settler;

/// Caller-supplied options for a single `exec` call: an optional `onEvent`
/// callback, and an optional list of transferables.
#[derive(Clone, Default)]
pub struct ExecOptions {
    pub on_event: Option<Arc<dyn Fn(Value) + Send + Sync>>,
    pub transferables: Vec<Vec<u8>>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(f));
        self
    }

    pub fn transferables(mut self, transferables: Vec<Vec<u8>>) -> Self {
        self.transferables = transferables;
        self
    }
}

/// A task enqueued by the scheduler, pending dispatch to a worker.
///
/// `submitted_at` is diagnostics only (surfaced through
/// [`crate::pool::PoolStats`] logging, not the wire protocol).
pub struct Task {
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
    pub transferables: Vec<Vec<u8>>,
    pub on_event: Option<Arc<dyn Fn(Value) + Send + Sync>>,
    pub settler: Settler<Value>,
    pub submitted_at: Instant,
}

impl Task {
    pub fn new(id: u64, method: String, params: Vec<Value>, options: ExecOptions, settler: Settler<Value>) -> Self {
        Self {
            id,
            method,
            params,
            transferables: options.transferables,
            on_event: options.on_event,
            settler,
            submitted_at: Instant::now(),
        }
    }
}
