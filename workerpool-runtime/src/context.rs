//! Per-request execution context: the worker-side `emit` channel.
//!
//! Rather than a process-wide mutable slot for "the current request", which
//! would race under concurrent async methods, the active request id (and the
//! channel back to the serve loop) are bound through a [`tokio::task_local!`]
//! scoped to exactly the future executing that request's handler. `emit()`
//! called outside that scope — no request active — is silently dropped.

use serde_json::Value;
use tokio::sync::mpsc;

use workerpool_core::ResponseBody;

/// A serve loop's outbound channel message: either a mid-task event or a
/// request's terminal response. Shared between [`crate::runtime`] (which
/// drains it onto the wire) and this module (which is the only other place
/// that produces `Event` entries, via `emit`).
pub(crate) enum Completion {
    Event(u64, Value),
    Response(u64, ResponseBody),
}

tokio::task_local! {
    static EMIT_SCOPE: EmitScope;
}

#[derive(Clone)]
struct EmitScope {
    request_id: u64,
    tx: mpsc::UnboundedSender<Completion>,
}

/// Runs `fut` with the emit channel for `request_id` bound to the current
/// task-local scope. Used by the serve loop to wrap each spawned handler
/// invocation.
pub(crate) async fn with_request_scope<F>(
    request_id: u64,
    tx: mpsc::UnboundedSender<Completion>,
    fut: F,
) -> F::Output
where
    F: std::future::Future,
{
    EMIT_SCOPE.scope(EmitScope { request_id, tx }, fut).await
}

/// Emit a mid-task event tied to the currently executing request. A no-op
/// if called outside of any request's handler future.
pub fn emit(payload: Value) {
    let _ = EMIT_SCOPE.try_with(|scope| {
        let _ = scope.tx.send(Completion::Event(scope.request_id, payload));
    });
}

/// Handed to every registered method so it can emit events without reaching
/// for the free function directly.
#[derive(Clone, Copy, Default)]
pub struct WorkerContext;

impl WorkerContext {
    pub fn emit(&self, payload: Value) {
        emit(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_outside_scope_is_silently_dropped() {
        // No task_local scope active — must not panic.
        emit(Value::from("ignored"));
    }

    #[tokio::test]
    async fn emit_inside_scope_reaches_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        with_request_scope(7, tx, async {
            emit(Value::from("hello"));
        })
        .await;

        match rx.recv().await.unwrap() {
            Completion::Event(request_id, payload) => {
                assert_eq!(request_id, 7);
                assert_eq!(payload, Value::from("hello"));
            }
            Completion::Response(..) => panic!("expected event"),
        }
    }

    #[tokio::test]
    async fn context_emit_delegates_to_free_function() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        with_request_scope(3, tx, async {
            let ctx = WorkerContext;
            ctx.emit(Value::from(1));
        })
        .await;
        match rx.recv().await.unwrap() {
            Completion::Event(request_id, _) => assert_eq!(request_id, 3),
            Completion::Response(..) => panic!("expected event"),
        }
    }
}
