//! Glue for process-mode worker binaries: serve the wire protocol over the
//! process's own stdin/stdout, the transport a pool uses for
//! `WorkerType::Process`.

use tokio::io::{self, join};

use workerpool_core::WireError;

use crate::runtime::{WorkerDefinition, WorkerRuntime};

/// Runs a worker's serve loop over stdin/stdout until the pool sends a
/// `Terminate` frame or the pipe closes. Intended to be the entire body of
/// a process-mode worker binary's `main`.
pub async fn serve_stdio(definition: WorkerDefinition) -> Result<(), WireError> {
    let stream = join(io::stdin(), io::stdout());
    WorkerRuntime::new(definition).serve(stream).await
}
