//! In-executor RPC loop and method registry.
//!
//! This crate is linked into both process-mode worker binaries (served over
//! stdio, see [`stdio_transport`]) and the pool's in-process thread workers
//! (served over an in-memory duplex stream owned by `workerpool`). Both
//! transports drive the same [`WorkerRuntime`] against the same
//! [`MethodRegistry`], so user method code is transport-agnostic.

pub mod context;
pub mod registry;
pub mod runtime;
pub mod stdio_transport;

pub use context::{emit, WorkerContext};
pub use registry::{BoxedHandler, MethodRegistry};
pub use runtime::{WorkerBuilder, WorkerDefinition, WorkerRuntime};
pub use stdio_transport::serve_stdio;
