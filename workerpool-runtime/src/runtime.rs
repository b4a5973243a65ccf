//! The worker-side RPC serve loop.
//!
//! Reads `Request` frames off a transport, dispatches them against a
//! [`MethodRegistry`], and writes back `Response`/`Event` frames. One task
//! is spawned per in-flight request so that `emit()` calls from a running
//! handler can reach the wire while the handler is still executing, rather
//! than being buffered until it returns.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use workerpool_core::{
    EventBody, Frame, FrameBody, PoolError, ResponseBody, ResponseOutcome, WireError,
    WireErrorPayload, WorkerPoolCodec,
};

use crate::context::{with_request_scope, Completion, WorkerContext};
use crate::registry::MethodRegistry;

pub type TerminateHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// The methods a worker serves plus its optional shutdown hook — the result
/// of [`WorkerBuilder::build`].
#[derive(Clone)]
pub struct WorkerDefinition {
    pub registry: Arc<MethodRegistry>,
    pub on_terminate: Option<TerminateHandler>,
}

/// Fluent builder for a worker's method table.
#[derive(Default)]
pub struct WorkerBuilder {
    registry: MethodRegistry,
    on_terminate: Option<TerminateHandler>,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>, WorkerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<workerpool_core::WorkerOutcome, PoolError>> + Send + 'static,
    {
        self.registry.register(name, handler);
        self
    }

    pub fn on_terminate<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_terminate = Some(Arc::new(move || Box::pin(handler())));
        self
    }

    /// Finalizes the method table, auto-registering the built-in `methods`
    /// introspection call (the worker-side counterpart of `run`, which this
    /// workspace drops — see the registry module docs) so a caller can
    /// `exec("methods", [])` and get the key list back, same as any other
    /// registered method.
    pub fn build(self) -> WorkerDefinition {
        let mut registry = self.registry;
        let mut names = registry.method_names();
        names.push("methods".to_string());
        names.sort();
        registry.register("methods", move |_params, _ctx| {
            let names = names.clone();
            async move { Ok(workerpool_core::WorkerOutcome::Plain(Value::from(names))) }
        });

        WorkerDefinition {
            registry: Arc::new(registry),
            on_terminate: self.on_terminate,
        }
    }
}

/// Serves one worker connection until the pool terminates it or the
/// transport closes.
pub struct WorkerRuntime {
    definition: WorkerDefinition,
}

impl WorkerRuntime {
    pub fn new(definition: WorkerDefinition) -> Self {
        Self { definition }
    }

    /// Runs the handshake + serve loop over `stream` until termination.
    ///
    /// Used by process-mode workers, where frames must cross an OS process
    /// boundary and so are serialized through [`WorkerPoolCodec`].
    pub async fn serve<S>(&self, stream: S) -> Result<(), WireError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut framed = Framed::new(stream, WorkerPoolCodec::new());
        framed.send(Frame::ready()).await?;
        tracing::debug!("worker ready");

        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();

        loop {
            tokio::select! {
                incoming = framed.next() => {
                    match incoming {
                        None => {
                            tracing::debug!("transport closed, exiting serve loop");
                            break;
                        }
                        Some(Err(err)) => {
                            tracing::error!(error = %err, "frame decode error");
                            return Err(err);
                        }
                        Some(Ok(frame)) => {
                            if !self.handle_incoming(frame, tx.clone()).await {
                                break;
                            }
                        }
                    }
                }
                Some(completion) = rx.recv() => {
                    let outgoing = match completion {
                        Completion::Event(request_id, payload) => {
                            Frame::event(request_id, EventBody { payload })
                        }
                        Completion::Response(request_id, body) => {
                            Frame::response(request_id, body)
                        }
                    };
                    framed.send(outgoing).await?;
                }
            }
        }

        Ok(())
    }

    /// Runs the handshake + serve loop over a pair of `Frame` channels
    /// instead of a byte stream.
    ///
    /// In-process thread workers live in the same address space as the pool,
    /// so there is no OS boundary to cross and no reason to round-trip
    /// `params`/results through JSON bytes: frames (and the transferable
    /// buffers they carry) move by value through the channel instead of
    /// being copied across a process boundary that doesn't exist here.
    pub async fn serve_channels(
        &self,
        mut incoming: mpsc::UnboundedReceiver<Frame>,
        outgoing: mpsc::UnboundedSender<Frame>,
    ) {
        if outgoing.send(Frame::ready()).is_err() {
            return;
        }
        tracing::debug!("thread worker ready");

        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();

        loop {
            tokio::select! {
                frame = incoming.recv() => {
                    match frame {
                        None => {
                            tracing::debug!("channel transport closed, exiting serve loop");
                            break;
                        }
                        Some(frame) => {
                            if !self.handle_incoming(frame, tx.clone()).await {
                                break;
                            }
                        }
                    }
                }
                Some(completion) = rx.recv() => {
                    let frame = match completion {
                        Completion::Event(request_id, payload) => {
                            Frame::event(request_id, EventBody { payload })
                        }
                        Completion::Response(request_id, body) => {
                            Frame::response(request_id, body)
                        }
                    };
                    if outgoing.send(frame).is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Returns `false` when the loop should stop (termination requested).
    async fn handle_incoming(&self, frame: Frame, tx: mpsc::UnboundedSender<Completion>) -> bool {
        match frame.body {
            FrameBody::Terminate => {
                tracing::info!("termination requested");
                if let Some(handler) = self.definition.on_terminate.clone() {
                    handler().await;
                }
                false
            }
            FrameBody::Request(body) => {
                let request_id = frame.request_id;
                let registry = self.definition.registry.clone();
                let event_tx = tx.clone();
                tokio::spawn(async move {
                    let method = body.method.clone();
                    let handler = registry.get(&method);

                    let result = match handler {
                        None => Err(PoolError::UnknownMethod(method.clone())),
                        Some(handler) => {
                            let ctx = WorkerContext;
                            with_request_scope(
                                request_id,
                                event_tx.clone(),
                                handler(body.params, ctx),
                            )
                            .await
                        }
                    };

                    let response_body = match result {
                        Ok(outcome) => {
                            let (result, transferables) = outcome.into_parts();
                            ResponseBody {
                                outcome: ResponseOutcome::Ok {
                                    result,
                                    transferables,
                                },
                            }
                        }
                        Err(err) => ResponseBody {
                            outcome: ResponseOutcome::Err {
                                error: pool_error_to_wire(&method, err),
                            },
                        },
                    };

                    let _ = event_tx.send(Completion::Response(request_id, response_body));
                });
                true
            }
            FrameBody::Ready | FrameBody::Response(_) | FrameBody::Event(_) => {
                tracing::warn!("unexpected frame kind received by worker");
                true
            }
        }
    }
}

fn pool_error_to_wire(method: &str, err: PoolError) -> WireErrorPayload {
    match err {
        PoolError::UnknownMethod(method) => WireErrorPayload::from_unknown_method(&method),
        other => WireErrorPayload::from_user_error(method, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use workerpool_core::{RequestBody, TERMINATE_METHOD};

    fn echo_definition() -> WorkerDefinition {
        WorkerBuilder::new()
            .method("add", |params, _ctx| async move {
                let a = params[0].as_i64().unwrap_or(0);
                let b = params[1].as_i64().unwrap_or(0);
                Ok(workerpool_core::WorkerOutcome::Plain(Value::from(a + b)))
            })
            .build()
    }

    #[tokio::test]
    async fn serve_sends_ready_then_responds() {
        let (client, server) = duplex(8192);
        let runtime = WorkerRuntime::new(echo_definition());
        let server_task = tokio::spawn(async move { runtime.serve(server).await });

        let mut framed = Framed::new(client, WorkerPoolCodec::new());
        let ready = framed.next().await.unwrap().unwrap();
        assert!(matches!(ready.body, FrameBody::Ready));

        framed
            .send(Frame::request(
                1,
                RequestBody {
                    method: "add".to_string(),
                    params: vec![Value::from(2), Value::from(3)],
                    transferables: vec![],
                },
            ))
            .await
            .unwrap();

        let response = framed.next().await.unwrap().unwrap();
        match response.body {
            FrameBody::Response(body) => match body.outcome {
                ResponseOutcome::Ok { result, .. } => assert_eq!(result, Value::from(5)),
                ResponseOutcome::Err { .. } => panic!("expected ok"),
            },
            _ => panic!("expected response"),
        }

        framed.send(Frame::terminate()).await.unwrap();
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unknown_method_reports_error() {
        let (client, server) = duplex(8192);
        let runtime = WorkerRuntime::new(echo_definition());
        tokio::spawn(async move { runtime.serve(server).await });

        let mut framed = Framed::new(client, WorkerPoolCodec::new());
        let _ready = framed.next().await.unwrap().unwrap();

        framed
            .send(Frame::request(
                1,
                RequestBody {
                    method: "missing".to_string(),
                    params: vec![],
                    transferables: vec![],
                },
            ))
            .await
            .unwrap();

        let response = framed.next().await.unwrap().unwrap();
        match response.body {
            FrameBody::Response(body) => match body.outcome {
                ResponseOutcome::Err { error } => assert_eq!(error.name, "UnknownMethod"),
                ResponseOutcome::Ok { .. } => panic!("expected error"),
            },
            _ => panic!("expected response"),
        }
    }

    #[tokio::test]
    async fn terminate_literal_stays_reserved() {
        assert_eq!(TERMINATE_METHOD, "__workerpool-terminate__");
    }

    #[tokio::test]
    async fn methods_builtin_lists_registered_names() {
        let (client, server) = duplex(8192);
        let runtime = WorkerRuntime::new(echo_definition());
        tokio::spawn(async move { runtime.serve(server).await });

        let mut framed = Framed::new(client, WorkerPoolCodec::new());
        let _ready = framed.next().await.unwrap().unwrap();

        framed
            .send(Frame::request(
                1,
                RequestBody {
                    method: "methods".to_string(),
                    params: vec![],
                    transferables: vec![],
                },
            ))
            .await
            .unwrap();

        let response = framed.next().await.unwrap().unwrap();
        match response.body {
            FrameBody::Response(body) => match body.outcome {
                ResponseOutcome::Ok { result, .. } => {
                    assert_eq!(result, Value::from(vec!["add", "methods"]))
                }
                ResponseOutcome::Err { .. } => panic!("expected ok"),
            },
            _ => panic!("expected response"),
        }
    }

    #[tokio::test]
    async fn serve_channels_sends_ready_then_responds() {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let runtime = WorkerRuntime::new(echo_definition());
        tokio::spawn(async move { runtime.serve_channels(in_rx, out_tx).await });

        let ready = out_rx.recv().await.unwrap();
        assert!(matches!(ready.body, FrameBody::Ready));

        in_tx
            .send(Frame::request(
                1,
                RequestBody {
                    method: "add".to_string(),
                    params: vec![Value::from(4), Value::from(5)],
                    transferables: vec![],
                },
            ))
            .unwrap();

        let response = out_rx.recv().await.unwrap();
        match response.body {
            FrameBody::Response(body) => match body.outcome {
                ResponseOutcome::Ok { result, .. } => assert_eq!(result, Value::from(9)),
                ResponseOutcome::Err { .. } => panic!("expected ok"),
            },
            _ => panic!("expected response"),
        }
    }

    #[tokio::test]
    async fn serve_channels_exits_when_incoming_closed() {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let runtime = WorkerRuntime::new(echo_definition());
        let task = tokio::spawn(async move { runtime.serve_channels(in_rx, out_tx).await });

        let _ready = out_rx.recv().await.unwrap();
        drop(in_tx);
        task.await.unwrap();
    }
}
